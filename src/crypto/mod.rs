//! Cryptographic primitives (component C2): hashing, Ed25519 signing and
//! verification, password hashing, and token hashing.

pub mod keys;
pub mod password;

use ring::digest::{SHA256, digest};

/// SHA-256 of `bytes`.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let hash = digest(&SHA256, bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_ref());
    out
}

/// Unpadded URL-safe base64, the encoding Matrix uses for hashes,
/// signatures, and key material throughout the federation API.
pub fn base64_unpadded(bytes: &[u8]) -> String {
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}

/// Decodes unpadded URL-safe base64. Returns `None` on malformed input
/// rather than propagating a decode error — callers that need this (e.g.
/// signature verification) are specified to fail closed, not to raise.
pub fn base64_unpadded_decode(s: &str) -> Option<Vec<u8>> {
    base64::decode_config(s, base64::URL_SAFE_NO_PAD).ok()
}

/// Lowercase hex encoding, used only for diagnostics/log lines — the wire
/// format always uses base64.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `sha256(bytes)` as unpadded base64, the encoding stored under
/// `hashes.sha256` on a PDU.
pub fn sha256_unpadded_base64(bytes: &[u8]) -> String {
    base64_unpadded(&sha256(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_matches_known_vector() {
        let hash = sha256(b"");
        assert_eq!(hex(&hash), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn base64_round_trip() {
        let bytes = [1u8, 2, 3, 250, 251, 252];
        let encoded = base64_unpadded(&bytes);
        assert_eq!(base64_unpadded_decode(&encoded).unwrap(), bytes);
    }

    #[test]
    fn base64_decode_rejects_garbage() {
        assert!(base64_unpadded_decode("not valid base64 !!!").is_none());
    }
}
