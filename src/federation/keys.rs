//! Server-key store (component C7): fetch/cache/verify remote signing
//! keys, and re-sign them as a notary.
//!
//! Grounded in the teacher's `sign::load_keys`/`sign::Key` for the signing
//! side, generalized from "load our own keys off disk" into the full
//! three-layer lookup (hot cache, durable cache, origin fetch) plus
//! verification and notary re-signing §4.6 requires, using `reqwest` the
//! way the corpus's federation-facing examples (palpo, conduwuit) reach
//! for outbound HTTP.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{instrument, Level};

use crate::{
    canonical_json,
    crypto::{self, base64_unpadded_decode, keys::Ed25519SigningKey},
    error::{Error, ErrorKind},
};

use super::wire::ServerKeyResponse;

/// Durable cache of fetched key responses, keyed by server name. Modeled as
/// a trait so this crate doesn't hard-code a persistence engine (sled,
/// postgres — both Non-goals); an in-memory implementation ships for
/// tests, matching the [`crate::storage::PduStore`] boundary pattern.
#[async_trait]
pub trait KeyCache: Send + Sync {
    async fn get(&self, server_name: &str) -> Result<Vec<ServerKeyResponse>, Error>;
    async fn put(&self, server_name: &str, response: ServerKeyResponse) -> Result<(), Error>;
}

/// An in-memory [`KeyCache`] for tests: no eviction, no TTL sweep.
#[derive(Default)]
pub struct MemoryKeyCache {
    entries: Mutex<HashMap<String, Vec<ServerKeyResponse>>>,
}

impl MemoryKeyCache {
    pub fn new() -> Self {
        MemoryKeyCache { entries: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl KeyCache for MemoryKeyCache {
    async fn get(&self, server_name: &str) -> Result<Vec<ServerKeyResponse>, Error> {
        Ok(self.entries.lock().await.get(server_name).cloned().unwrap_or_default())
    }

    async fn put(&self, server_name: &str, response: ServerKeyResponse) -> Result<(), Error> {
        let mut entries = self.entries.lock().await;
        let slot = entries.entry(server_name.to_owned()).or_insert_with(Vec::new);
        slot.retain(|r| r.valid_until_ts != response.valid_until_ts);
        slot.push(response);
        Ok(())
    }
}

/// Per-server signing keys plus the cache and HTTP client used to fetch
/// and verify everyone else's. The only shared mutable state in the core
/// (§5): `inflight` coalesces concurrent fetches for the same server into
/// one, per the single-writer-per-key requirement.
pub struct KeyStore {
    server_name: String,
    signing_keys: HashMap<String, Ed25519SigningKey>,
    cache: Arc<dyn KeyCache>,
    client: reqwest::Client,
    timeout: Duration,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyStore {
    pub fn new(
        server_name: String,
        signing_keys: HashMap<String, Ed25519SigningKey>,
        cache: Arc<dyn KeyCache>,
        timeout: Duration,
    ) -> Self {
        KeyStore {
            server_name,
            signing_keys,
            cache,
            client: reqwest::Client::new(),
            timeout,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns cached key responses for `server`, refetching from the
    /// origin only if every cached entry expires before
    /// `min_valid_until_ts`. A fetch failure falls back to whatever is
    /// cached, even if stale, per the §4.6 failure policy; an empty cache
    /// and an unreachable origin propagate the error.
    #[instrument(skip(self), err = Level::DEBUG)]
    pub async fn get_keys(&self, server: &str, min_valid_until_ts: i64) -> Result<Vec<ServerKeyResponse>, Error> {
        if let Some(fresh) = self.fresh_cached(server, min_valid_until_ts).await? {
            return Ok(fresh);
        }

        let lock = self.inflight_lock(server).await;
        let _guard = lock.lock().await;

        // Another caller may have completed the fetch while we waited.
        if let Some(fresh) = self.fresh_cached(server, min_valid_until_ts).await? {
            return Ok(fresh);
        }

        match self.fetch_from_origin(server).await {
            Ok(response) => {
                self.cache.put(server, response.clone()).await?;
                Ok(vec![response])
            }
            Err(e) => {
                let cached = self.cache.get(server).await?;
                if !cached.is_empty() {
                    Ok(cached)
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn fresh_cached(&self, server: &str, min_valid_until_ts: i64) -> Result<Option<Vec<ServerKeyResponse>>, Error> {
        let cached = self.cache.get(server).await?;
        if cached.iter().any(|r| r.valid_until_ts >= min_valid_until_ts) {
            Ok(Some(cached))
        } else {
            Ok(None)
        }
    }

    async fn inflight_lock(&self, server: &str) -> Arc<Mutex<()>> {
        let mut map = self.inflight.lock().await;
        map.entry(server.to_owned()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn fetch_from_origin(&self, server: &str) -> Result<ServerKeyResponse, Error> {
        let url = format!("https://{}/_matrix/key/v2/server", server);
        let request = self.client.get(&url).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ErrorKind::NotReachable)?
            .map_err(|_| ErrorKind::NotReachable)?;
        if !response.status().is_success() {
            return Err(ErrorKind::NotReachable.into());
        }
        let bytes = response.bytes().await.map_err(|_| ErrorKind::NotReachable)?;
        let value = canonical_json::decode(&bytes)?;
        let body: ServerKeyResponse =
            serde_json::from_value(value).map_err(|e| ErrorKind::InvalidJson(e.to_string()))?;
        if !self_signature_valid(&body) {
            return Err(ErrorKind::InvalidSignature.into());
        }
        Ok(body)
    }

    /// Verifies every `(server, key_id)` signature on `event` against the
    /// canonicalized event minus `signatures`/`unsigned`. An unknown key or
    /// an unreachable origin fails verification rather than propagating —
    /// §4.6 specifies this returns `false`, it does not throw. A key that
    /// has rotated into `old_verify_keys` is honored only up to its
    /// `expired_ts`: a signature timestamped (via `origin_server_ts`) after
    /// that point is rejected even though the key bytes still decode fine,
    /// per §8 scenario 5.
    #[instrument(skip(self, event))]
    pub async fn verify_event(&self, event: &Value) -> bool {
        let signatures = match event.get("signatures").and_then(Value::as_object) {
            Some(s) => s,
            None => return false,
        };
        let event_ts = event.get("origin_server_ts").and_then(Value::as_i64).unwrap_or(i64::MAX);
        for (server, sig_map) in signatures {
            let sig_map = match sig_map.as_object() {
                Some(m) => m,
                None => return false,
            };
            for key_id in sig_map.keys() {
                let public_key = match self.public_key_for(server, key_id, event_ts).await {
                    Some(pk) => pk,
                    None => return false,
                };
                if !crypto::keys::verify_json(event, server, key_id, &public_key) {
                    return false;
                }
            }
        }
        true
    }

    /// Resolves `(server, key_id)` to a 32-byte public key, usable as of
    /// `at_ts` (an `origin_server_ts`, or `i64::MAX` for "any time", e.g.
    /// when verifying a key response's own self-signature). A current
    /// `verify_keys` entry is always eligible; an `old_verify_keys` entry
    /// is eligible only while `at_ts <= expired_ts`.
    async fn public_key_for(&self, server: &str, key_id: &str, at_ts: i64) -> Option<[u8; 32]> {
        let responses = self.get_keys(server, 0).await.ok()?;
        for response in &responses {
            if let Some(vk) = response.verify_keys.get(key_id) {
                if let Some(bytes) = decode_key(&vk.key) {
                    return Some(bytes);
                }
            }
            if let Some(old) = response.old_verify_keys.get(key_id) {
                if at_ts <= old.expired_ts {
                    if let Some(bytes) = decode_key(&old.key) {
                        return Some(bytes);
                    }
                }
            }
        }
        None
    }

    /// Fetches `server`'s key response, optionally narrows `verify_keys` to
    /// a single `key_id`, and attaches this server's own signature —
    /// exposing the notary key-query endpoint.
    #[instrument(skip(self), err = Level::DEBUG)]
    pub async fn notary_resign(
        &self,
        server: &str,
        key_id: Option<&str>,
        min_valid_until_ts: i64,
    ) -> Result<ServerKeyResponse, Error> {
        let mut response = self
            .get_keys(server, min_valid_until_ts)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ErrorKind::MissingKey(server.to_owned(), key_id.unwrap_or("").to_owned()))?;

        if let Some(id) = key_id {
            response.verify_keys.retain(|k, _| k == id);
        }

        let existing = serde_json::to_value(&response.signatures)?;
        let mut value = serde_json::to_value(&response)?;
        let signed = crypto::keys::sign_json(&value, &self.server_name, &self.signing_keys, Some(&existing))?;
        value.as_object_mut().unwrap().insert("signatures".to_owned(), signed.clone());
        response.signatures = signed.as_object().cloned().unwrap_or_default();
        Ok(response)
    }
}

fn decode_key(base64: &str) -> Option<[u8; 32]> {
    let bytes = base64_unpadded_decode(base64)?;
    if bytes.len() != 32 {
        return None;
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Some(out)
}

fn self_signature_valid(response: &ServerKeyResponse) -> bool {
    let value = match serde_json::to_value(response) {
        Ok(v) => v,
        Err(_) => return false,
    };
    response.verify_keys.iter().any(|(key_id, vk)| match decode_key(&vk.key) {
        Some(public_key) => crypto::keys::verify_json(&value, &response.server_name, key_id, &public_key),
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    /// Generates a fresh key, builds a self-signed [`ServerKeyResponse`] for
    /// it, and returns the PKCS#8 bytes alongside so the caller can
    /// reconstruct an independent `Ed25519SigningKey` for further signing
    /// (`Ed25519SigningKey` isn't `Clone` — `ring` key pairs aren't either).
    fn key_and_response(server_name: &str, key_id: &str, valid_until_ts: i64) -> (Vec<u8>, ServerKeyResponse) {
        let (key, pkcs8) = Ed25519SigningKey::generate().unwrap();
        let mut verify_keys = HashMap::new();
        verify_keys.insert(key_id.to_owned(), super::super::wire::VerifyKey { key: key.public_key_base64() });
        let mut response = ServerKeyResponse {
            server_name: server_name.to_owned(),
            valid_until_ts,
            verify_keys,
            old_verify_keys: HashMap::new(),
            signatures: Default::default(),
        };
        let value = serde_json::to_value(&response).unwrap();
        let mut keys = HashMap::new();
        keys.insert(key_id.to_owned(), key);
        let signatures = crypto::keys::sign_json(&value, server_name, &keys, None).unwrap();
        response.signatures = signatures.as_object().cloned().unwrap();
        (pkcs8, response)
    }

    #[tokio::test]
    async fn get_keys_serves_from_cache_without_fetching() {
        let (_pkcs8, response) = key_and_response("alice.example.org", "ed25519:1", 9_999_999_999_999);
        let cache = Arc::new(MemoryKeyCache::new());
        cache.put("alice.example.org", response).await.unwrap();

        let store = KeyStore::new(
            "example.org".to_owned(),
            HashMap::new(),
            cache,
            Duration::from_secs(10),
        );
        let result = store.get_keys("alice.example.org", 0).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].server_name, "alice.example.org");
    }

    #[tokio::test]
    async fn verify_event_accepts_a_validly_signed_event() {
        let (pkcs8, response) = key_and_response("alice.example.org", "ed25519:1", 9_999_999_999_999);
        let cache = Arc::new(MemoryKeyCache::new());
        cache.put("alice.example.org", response).await.unwrap();
        let store = KeyStore::new("example.org".to_owned(), HashMap::new(), cache, Duration::from_secs(10));

        let key = Ed25519SigningKey::from_pkcs8(&pkcs8).unwrap();
        let mut keys = HashMap::new();
        keys.insert("ed25519:1".to_owned(), key);
        let event = serde_json::json!({"room_id": "!room:alice.example.org"});
        let signatures = crypto::keys::sign_json(&event, "alice.example.org", &keys, None).unwrap();
        let mut signed_event = event.clone();
        signed_event.as_object_mut().unwrap().insert("signatures".to_owned(), signatures);

        assert!(store.verify_event(&signed_event).await);
    }

    #[tokio::test]
    async fn verify_event_rejects_an_unknown_server() {
        let cache = Arc::new(MemoryKeyCache::new());
        let store = KeyStore::new("example.org".to_owned(), HashMap::new(), cache, Duration::from_secs(10));
        let event = serde_json::json!({
            "room_id": "!room:nowhere.example.org",
            "signatures": {"nowhere.example.org": {"ed25519:1": "deadbeef"}},
        });
        assert!(!store.verify_event(&event).await);
    }

    #[tokio::test]
    async fn rotated_key_verifies_before_expiry_and_fails_after() {
        let (old_key, old_pkcs8) = Ed25519SigningKey::generate().unwrap();
        let (current_key, _current_pkcs8) = Ed25519SigningKey::generate().unwrap();

        let mut verify_keys = HashMap::new();
        verify_keys.insert("ed25519:2".to_owned(), super::super::wire::VerifyKey { key: current_key.public_key_base64() });
        let mut old_verify_keys = HashMap::new();
        old_verify_keys
            .insert("ed25519:1".to_owned(), super::super::wire::OldVerifyKey { key: old_key.public_key_base64(), expired_ts: 1_000 });
        let response = ServerKeyResponse {
            server_name: "alice.example.org".to_owned(),
            valid_until_ts: 9_999_999_999_999,
            verify_keys,
            old_verify_keys,
            signatures: Default::default(),
        };
        let cache = Arc::new(MemoryKeyCache::new());
        cache.put("alice.example.org", response).await.unwrap();
        let store = KeyStore::new("example.org".to_owned(), HashMap::new(), cache, Duration::from_secs(10));

        let old_key = Ed25519SigningKey::from_pkcs8(&old_pkcs8).unwrap();
        let mut signing_keys = HashMap::new();
        signing_keys.insert("ed25519:1".to_owned(), old_key);

        let before = serde_json::json!({"room_id": "!room:alice.example.org", "origin_server_ts": 500});
        let signatures = crypto::keys::sign_json(&before, "alice.example.org", &signing_keys, None).unwrap();
        let mut signed_before = before.clone();
        signed_before.as_object_mut().unwrap().insert("signatures".to_owned(), signatures);
        assert!(store.verify_event(&signed_before).await);

        let after = serde_json::json!({"room_id": "!room:alice.example.org", "origin_server_ts": 2_000});
        let signatures = crypto::keys::sign_json(&after, "alice.example.org", &signing_keys, None).unwrap();
        let mut signed_after = after.clone();
        signed_after.as_object_mut().unwrap().insert("signatures".to_owned(), signatures);
        assert!(!store.verify_event(&signed_after).await);
    }
}
