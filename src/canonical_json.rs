//! Deterministic byte serialization for signing and hashing (component C1).
//!
//! Matrix's canonical JSON is a restriction of JSON: object keys sorted by
//! Unicode code point, no insignificant whitespace, minimal string escaping,
//! and integers emitted without an exponent or a trailing `.0`. Two honest
//! implementations must produce byte-identical output for the same value,
//! because that output is what gets hashed and signed.

use std::{collections::BTreeMap, fmt};

use serde::{
    Deserialize, Deserializer,
    de::{MapAccess, SeqAccess, Visitor},
};
use serde_json::{Map, Number, Value};

use crate::error::{Error, ErrorKind};

/// Parses `bytes` as JSON, rejecting duplicate object keys.
///
/// `serde_json::from_slice::<Value>` silently keeps the last occurrence of
/// a repeated key, which would let two inputs with different bytes decode
/// to what look like the same `Value` while actually differing in ways a
/// signature doesn't cover. `decode` treats that ambiguity as malformed
/// input instead.
pub fn decode(bytes: &[u8]) -> Result<Value, Error> {
    let strict: Strict = serde_json::from_slice(bytes)
        .map_err(|e| ErrorKind::InvalidJson(format!("{}", e)))?;
    Ok(strict.0)
}

/// Encodes `value` as canonical JSON bytes: keys sorted by Unicode code
/// point, no whitespace, integers without an exponent, no `.0` suffix for
/// integer-valued numbers.
///
/// `value` must already be free of `NaN`/`±Infinity` (impossible to
/// construct from decoded JSON, since [`serde_json::Number`] refuses to
/// hold them) and of duplicate keys (guaranteed if `value` came from
/// [`decode`] rather than being built by hand with a map type that allows
/// collisions).
pub fn encode(value: &Value) -> String {
    sorted(value).to_string()
}

/// Convenience wrapper: decode then re-encode, failing if the input isn't
/// valid canonical-JSON-representable data.
pub fn canonicalize(bytes: &[u8]) -> Result<String, Error> {
    Ok(encode(&decode(bytes)?))
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<&String, &Value> = map.iter().collect();
            let mut out = Map::with_capacity(map.len());
            for (k, v) in ordered {
                out.insert(k.clone(), sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// A `Value` wrapper whose `Deserialize` impl rejects objects containing
/// the same key twice, recursively.
struct Strict(Value);

impl<'de> Deserialize<'de> for Strict {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(StrictVisitor)
    }
}

struct StrictVisitor;

impl<'de> Visitor<'de> for StrictVisitor {
    type Value = Strict;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value with no duplicate object keys")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Strict, E> {
        Ok(Strict(Value::Bool(v)))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Strict, E> {
        Ok(Strict(Value::Number(v.into())))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Strict, E> {
        Ok(Strict(Value::Number(v.into())))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Strict, E>
    where
        E: serde::de::Error,
    {
        Number::from_f64(v)
            .map(|n| Strict(Value::Number(n)))
            .ok_or_else(|| E::custom("non-finite number is not valid JSON"))
    }

    fn visit_str<E>(self, v: &str) -> Result<Strict, E> {
        Ok(Strict(Value::String(v.to_owned())))
    }

    fn visit_string<E>(self, v: String) -> Result<Strict, E> {
        Ok(Strict(Value::String(v)))
    }

    fn visit_unit<E>(self) -> Result<Strict, E> {
        Ok(Strict(Value::Null))
    }

    fn visit_none<E>(self) -> Result<Strict, E> {
        Ok(Strict(Value::Null))
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Strict, D::Error>
    where
        D: Deserializer<'de>,
    {
        Strict::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Strict, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(Strict(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(Strict(Value::Array(items)))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Strict, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut seen = Map::new();
        while let Some((key, Strict(value))) = map.next_entry::<String, Strict>()? {
            if seen.contains_key(&key) {
                return Err(serde::de::Error::custom(format!("duplicate object key: {}", key)));
            }
            seen.insert(key, value);
        }
        Ok(Strict(Value::Object(seen)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{canonicalize, decode, encode};

    #[test]
    fn sorts_keys() {
        let value = json!({"b": 1, "a": 2});
        assert_eq!(encode(&value), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn no_whitespace_nested() {
        let value = json!({"a": [1, 2, {"z": 1, "y": 2}]});
        assert_eq!(encode(&value), r#"{"a":[1,2,{"y":2,"z":1}]}"#);
    }

    #[test]
    fn integers_have_no_trailing_dot_zero() {
        let value = json!({"depth": 3});
        assert_eq!(encode(&value), r#"{"depth":3}"#);
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = decode(br#"{"a":1,"a":2}"#).unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::InvalidJson(_)));
    }

    #[test]
    fn rejects_duplicate_keys_nested() {
        let err = decode(br#"{"a":{"b":1,"b":2}}"#).unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::InvalidJson(_)));
    }

    #[test]
    fn round_trip_law() {
        let value = json!({"z": "last", "a": ["x", 1, null, true], "m": {"1": 1, "0": 0}});
        let encoded = encode(&value);
        let decoded = decode(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(encode(&decoded), encoded);
    }

    #[test]
    fn canonicalize_rejects_bad_input() {
        canonicalize(br#"{"dup":1,"dup":2}"#).unwrap_err();
    }
}
