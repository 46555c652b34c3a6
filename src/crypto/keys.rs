//! Ed25519 key material: generation, loading, signing, and verification,
//! plus signing/verifying whole JSON objects per the Matrix signing
//! algorithm (strip `signatures`/`unsigned`, canonicalize, sign).

use std::{collections::HashMap, path::Path};

use ring::{
    rand::SystemRandom,
    signature::{ED25519, Ed25519KeyPair, UnparsedPublicKey},
};
use serde_json::{Map, Value};

use crate::{
    canonical_json,
    crypto::{base64_unpadded, base64_unpadded_decode},
    error::{Error, ErrorKind},
};

/// An Ed25519 key pair this server holds and signs with.
///
/// Wraps `ring`'s key pair the same way the teacher's `sign::Key` does,
/// generalized to expose the raw public key (needed to publish
/// `verify_keys`) and to support generating fresh keys, not just loading
/// them from disk.
pub struct Ed25519SigningKey {
    keypair: Ed25519KeyPair,
}

impl Ed25519SigningKey {
    /// Generates a new key pair. Returns the key together with its PKCS#8
    /// document so the caller can persist it — `ring` does not let a
    /// generated `Ed25519KeyPair` give up its private bytes any other way.
    pub fn generate() -> Result<(Self, Vec<u8>), Error> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| ErrorKind::InvalidEvent("failed to generate ed25519 key pair".into()))?;
        let keypair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|_| ErrorKind::InvalidEvent("generated pkcs8 document was rejected".into()))?;
        Ok((Ed25519SigningKey { keypair }, pkcs8.as_ref().to_vec()))
    }

    pub fn from_pkcs8(bytes: &[u8]) -> Result<Self, Error> {
        let keypair = Ed25519KeyPair::from_pkcs8(bytes)
            .map_err(|_| ErrorKind::InvalidEvent("malformed pkcs8 ed25519 key".into()))?;
        Ok(Ed25519SigningKey { keypair })
    }

    pub async fn load_pkcs8(path: &Path) -> Result<Self, Error> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ErrorKind::InvalidEvent(format!("failed to read key {}: {}", path.display(), e)))?;
        Self::from_pkcs8(&bytes)
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.keypair.public_key().as_ref());
        out
    }

    pub fn public_key_base64(&self) -> String {
        base64_unpadded(&self.public_key_bytes())
    }

    pub fn sign(&self, bytes: &[u8]) -> [u8; 64] {
        let mut out = [0u8; 64];
        out.copy_from_slice(self.keypair.sign(bytes).as_ref());
        out
    }
}

/// `ed25519_verify`: returns `false` for any length or decode failure
/// instead of raising — signature verification is specified to fail
/// closed, never to propagate a parse error up as if it were distinct
/// from an invalid signature.
pub fn ed25519_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    if public_key.len() != 32 || signature.len() != 64 {
        return false;
    }
    UnparsedPublicKey::new(&ED25519, public_key).verify(message, signature).is_ok()
}

/// Strips `signatures` and `unsigned`, canonicalizes, and signs the
/// result with every key in `keys`, merging the results into an existing
/// `signatures` map (by `server_name`) without disturbing entries for
/// other servers or other key IDs under the same server.
pub fn sign_json(
    object: &Value,
    server_name: &str,
    keys: &HashMap<String, Ed25519SigningKey>,
    existing_signatures: Option<&Value>,
) -> Result<Value, Error> {
    let mut stripped = object.clone();
    if let Some(map) = stripped.as_object_mut() {
        map.remove("signatures");
        map.remove("unsigned");
    }
    let canonical = canonical_json::encode(&stripped);

    let mut by_server: Map<String, Value> = existing_signatures
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let mut our_sigs: Map<String, Value> = by_server
        .get(server_name)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    for (key_id, key) in keys {
        let signature = key.sign(canonical.as_bytes());
        our_sigs.insert(key_id.clone(), Value::String(base64_unpadded(&signature)));
    }
    by_server.insert(server_name.to_owned(), Value::Object(our_sigs));
    Ok(Value::Object(by_server))
}

/// Verifies one `(server, key_id)` signature on `object`, given the
/// server's public key. Strips `signatures`/`unsigned` the same way
/// `sign_json` does before checking.
pub fn verify_json(object: &Value, server_name: &str, key_id: &str, public_key: &[u8]) -> bool {
    let signature = match object
        .get("signatures")
        .and_then(|s| s.get(server_name))
        .and_then(|s| s.get(key_id))
        .and_then(Value::as_str)
        .and_then(base64_unpadded_decode)
    {
        Some(sig) => sig,
        None => return false,
    };

    let mut stripped = object.clone();
    if let Some(map) = stripped.as_object_mut() {
        map.remove("signatures");
        map.remove("unsigned");
    }
    let canonical = canonical_json::encode(&stripped);
    ed25519_verify(public_key, &signature, canonical.as_bytes())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let (key, _pkcs8) = Ed25519SigningKey::generate().unwrap();
        let public = key.public_key_bytes();
        let message = b"the owls are not what they seem";
        let sig = key.sign(message);
        assert!(ed25519_verify(&public, &sig, message));
    }

    #[test]
    fn flipping_a_byte_falsifies_verification() {
        let (key, _) = Ed25519SigningKey::generate().unwrap();
        let public = key.public_key_bytes();
        let message = b"hello federation";
        let mut sig = key.sign(message);
        sig[0] ^= 0xff;
        assert!(!ed25519_verify(&public, &sig, message));
    }

    #[test]
    fn verify_rejects_malformed_lengths() {
        assert!(!ed25519_verify(&[0u8; 31], &[0u8; 64], b"x"));
        assert!(!ed25519_verify(&[0u8; 32], &[0u8; 63], b"x"));
    }

    #[test]
    fn sign_json_then_verify_json_round_trips() {
        let (key, _) = Ed25519SigningKey::generate().unwrap();
        let mut keys = HashMap::new();
        keys.insert("ed25519:1".to_owned(), key);
        let object = json!({"hello": "world", "unsigned": {"age": 4}});
        let signatures = sign_json(&object, "example.org", &keys, None).unwrap();

        let mut signed = object.clone();
        signed.as_object_mut().unwrap().insert("signatures".into(), signatures);

        let public = keys.get("ed25519:1").unwrap().public_key_bytes();
        assert!(verify_json(&signed, "example.org", "ed25519:1", &public));
    }

    #[test]
    fn sign_json_preserves_other_servers_signatures() {
        let (key, _) = Ed25519SigningKey::generate().unwrap();
        let mut keys = HashMap::new();
        keys.insert("ed25519:1".to_owned(), key);
        let object = json!({"hello": "world"});
        let existing = json!({"other.org": {"ed25519:9": "deadbeef"}});
        let signatures = sign_json(&object, "example.org", &keys, Some(&existing)).unwrap();
        assert_eq!(signatures["other.org"]["ed25519:9"], "deadbeef");
        assert!(signatures["example.org"]["ed25519:1"].is_string());
    }
}
