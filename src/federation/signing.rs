//! Federation request signer (component C8): `X-Matrix` header
//! construction and tolerant parsing.
//!
//! Grounded in the teacher's `sign::sign_json` for the canonicalize-then-
//! sign step, generalized from "sign this JSON object" into "sign this
//! outbound HTTP request" per §4.7 — the canonical object is
//! `{method, uri, origin, destination, content?}`, not the PDU itself.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{instrument, Level};

use crate::{
    crypto::{self, keys::Ed25519SigningKey},
    error::{Error, ErrorKind},
};

/// Builds and verifies `X-Matrix` authorization headers for one server
/// identity. Holds the same key material [`crate::federation::keys::KeyStore`]
/// does, but is otherwise independent of it — a caller that only needs to
/// sign outbound requests doesn't need a key cache.
pub struct RequestSigner {
    server_name: String,
    signing_key_id: String,
    signing_keys: HashMap<String, Ed25519SigningKey>,
}

impl RequestSigner {
    pub fn new(server_name: String, signing_key_id: String, signing_keys: HashMap<String, Ed25519SigningKey>) -> Self {
        RequestSigner { server_name, signing_key_id, signing_keys }
    }

    /// Signs an outbound federation request, returning the full `X-Matrix`
    /// header value. `content` is included in the signed object iff the
    /// request has a body.
    #[instrument(skip(self, content), err = Level::DEBUG)]
    pub fn sign_request(&self, method: &str, uri: &str, destination: &str, content: Option<&Value>) -> Result<String, Error> {
        let object = canonical_request_object(method, uri, &self.server_name, destination, content);
        let signatures = crypto::keys::sign_json(&object, &self.server_name, &self.signing_keys, None)?;
        let signature = signatures
            .get(&self.server_name)
            .and_then(|m| m.get(&self.signing_key_id))
            .and_then(Value::as_str)
            .ok_or_else(|| ErrorKind::InvalidEvent("signing key id produced no signature".into()))?;
        Ok(format!(
            "X-Matrix origin=\"{}\",destination=\"{}\",key=\"{}\",sig=\"{}\"",
            self.server_name, destination, self.signing_key_id, signature
        ))
    }

    /// Verifies an inbound `X-Matrix` header against the request it was
    /// sent with. `lookup_key` resolves `(origin, key_id)` to the origin's
    /// public key (typically `KeyStore::public_key_for`-shaped, supplied by
    /// the caller so this module stays independent of the key store).
    #[instrument(skip(self, content, lookup_key), err = Level::DEBUG)]
    pub fn verify_request(
        &self,
        header: &str,
        method: &str,
        uri: &str,
        content: Option<&Value>,
        lookup_key: impl FnOnce(&str, &str) -> Option<[u8; 32]>,
    ) -> Result<(), Error> {
        let fields = parse_x_matrix_header(header)?;
        if fields.destination != self.server_name {
            return Err(ErrorKind::unauthorized("x-matrix-destination", "destination does not name this server").into());
        }

        let mut object = canonical_request_object(method, uri, &fields.origin, &fields.destination, content);
        let mut sig_for_origin = Map::new();
        sig_for_origin.insert(fields.key_id.clone(), Value::String(fields.sig.clone()));
        let mut signatures = Map::new();
        signatures.insert(fields.origin.clone(), Value::Object(sig_for_origin));
        object.as_object_mut().unwrap().insert("signatures".to_owned(), Value::Object(signatures));

        let public_key =
            lookup_key(&fields.origin, &fields.key_id).ok_or_else(|| ErrorKind::MissingKey(fields.origin.clone(), fields.key_id.clone()))?;
        if crypto::keys::verify_json(&object, &fields.origin, &fields.key_id, &public_key) {
            Ok(())
        } else {
            Err(ErrorKind::InvalidSignature.into())
        }
    }
}

fn canonical_request_object(method: &str, uri: &str, origin: &str, destination: &str, content: Option<&Value>) -> Value {
    let mut object = Map::new();
    object.insert("method".to_owned(), Value::String(method.to_owned()));
    object.insert("uri".to_owned(), Value::String(uri.to_owned()));
    object.insert("origin".to_owned(), Value::String(origin.to_owned()));
    object.insert("destination".to_owned(), Value::String(destination.to_owned()));
    if let Some(content) = content {
        object.insert("content".to_owned(), content.clone());
    }
    Value::Object(object)
}

struct XMatrixFields {
    origin: String,
    destination: String,
    key_id: String,
    sig: String,
}

/// Parses an `X-Matrix` header where the four `name="value"` fields may
/// appear in any order and quoting is optional, per §4.7.
fn parse_x_matrix_header(header: &str) -> Result<XMatrixFields, Error> {
    let rest = header
        .trim()
        .strip_prefix("X-Matrix")
        .ok_or_else(|| Error::from(ErrorKind::unauthorized("x-matrix-parse", "missing X-Matrix scheme")))?
        .trim_start();

    let mut origin = None;
    let mut destination = None;
    let mut key_id = None;
    let mut sig = None;

    for field in rest.split(',') {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let (name, value) = field
            .split_once('=')
            .ok_or_else(|| Error::from(ErrorKind::unauthorized("x-matrix-parse", format!("malformed field: {}", field))))?;
        let value = value.trim().trim_matches('"').to_owned();
        match name.trim() {
            "origin" => origin = Some(value),
            "destination" => destination = Some(value),
            "key" => key_id = Some(value),
            "sig" => sig = Some(value),
            _ => {}
        }
    }

    Ok(XMatrixFields {
        origin: origin.ok_or_else(|| Error::from(ErrorKind::unauthorized("x-matrix-parse", "missing origin field")))?,
        destination: destination
            .ok_or_else(|| Error::from(ErrorKind::unauthorized("x-matrix-parse", "missing destination field")))?,
        key_id: key_id.ok_or_else(|| Error::from(ErrorKind::unauthorized("x-matrix-parse", "missing key field")))?,
        sig: sig.ok_or_else(|| Error::from(ErrorKind::unauthorized("x-matrix-parse", "missing sig field")))?,
    })
}
