//! Password and token hashing.
//!
//! The protocol core's password hashing deliberately departs from the
//! teacher's argon2 choice: PBKDF2-HMAC-SHA256 is mandated so that hash
//! verification only needs `ring`, which is already a hard dependency for
//! signing, rather than pulling in a second KDF crate for one call site.

use ring::{
    pbkdf2,
    rand::{SecureRandom, SystemRandom},
};

use crate::crypto::{base64_unpadded, base64_unpadded_decode, sha256_unpadded_base64};

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Hashes `password`, producing a self-describing string of the form
/// `$pbkdf2-sha256$<iterations>$<salt>$<hash>` with `salt`/`hash` as
/// unpadded base64. The iteration count travels with the hash so a future
/// bump doesn't invalidate existing records.
pub fn password_hash(password: &str) -> String {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt).expect("system RNG failure");

    let mut out = [0u8; HASH_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        std::num::NonZeroU32::new(PBKDF2_ITERATIONS).unwrap(),
        &salt,
        password.as_bytes(),
        &mut out,
    );

    format!("$pbkdf2-sha256${}${}${}", PBKDF2_ITERATIONS, base64_unpadded(&salt), base64_unpadded(&out))
}

/// Verifies `password` against a hash produced by [`password_hash`].
/// Returns `false` on any malformed hash string rather than raising, the
/// same fail-closed posture as signature verification.
pub fn password_verify(password: &str, hash: &str) -> bool {
    let mut parts = hash.split('$');
    // hash starts with '$', so the first split element is empty.
    let (Some(""), Some("pbkdf2-sha256"), Some(iterations), Some(salt), Some(expected)) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if parts.next().is_some() {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else { return false };
    let Some(iterations) = std::num::NonZeroU32::new(iterations) else { return false };
    let Some(salt) = base64_unpadded_decode(salt) else { return false };
    let Some(expected) = base64_unpadded_decode(expected) else { return false };

    pbkdf2::verify(pbkdf2::PBKDF2_HMAC_SHA256, iterations, &salt, password.as_bytes(), &expected).is_ok()
}

/// Hashes an access/refresh token for storage-at-rest, the way the core
/// hashes any opaque bearer credential it must persist: a plain SHA-256,
/// since tokens are already high-entropy random strings and don't need a
/// slow KDF the way human-chosen passwords do.
pub fn token_hash(token: &str) -> String {
    sha256_unpadded_base64(token.as_bytes())
}

/// Generates a random alphanumeric string of `len` characters by rejection
/// sampling bytes from the system RNG against [`TOKEN_ALPHABET`], so every
/// character is uniformly distributed rather than biased by a modulo.
pub fn random_string(len: usize) -> String {
    let rng = SystemRandom::new();
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 1];
    while out.len() < len {
        rng.fill(&mut buf).expect("system RNG failure");
        // Reject bytes that would bias the modulo toward the low end of the
        // alphabet: only accept values in the largest multiple of the
        // alphabet length that fits in a byte.
        let limit = (256 / TOKEN_ALPHABET.len()) * TOKEN_ALPHABET.len();
        if (buf[0] as usize) < limit {
            out.push(TOKEN_ALPHABET[buf[0] as usize % TOKEN_ALPHABET.len()] as char);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let hash = password_hash("correct horse battery staple");
        assert!(password_verify("correct horse battery staple", &hash));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hash = password_hash("hunter2");
        assert!(!password_verify("hunter3", &hash));
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        assert!(!password_verify("anything", "not-a-hash-at-all"));
        assert!(!password_verify("anything", "$pbkdf2-sha256$notanumber$salt$hash"));
        assert!(!password_verify("anything", "$argon2$100000$salt$hash"));
    }

    #[test]
    fn two_hashes_of_same_password_differ_by_salt() {
        let a = password_hash("hunter2");
        let b = password_hash("hunter2");
        assert_ne!(a, b);
    }

    #[test]
    fn token_hash_is_deterministic() {
        assert_eq!(token_hash("abc123"), token_hash("abc123"));
        assert_ne!(token_hash("abc123"), token_hash("abc124"));
    }

    #[test]
    fn random_string_has_requested_length_and_alphabet() {
        let s = random_string(40);
        assert_eq!(s.len(), 40);
        assert!(s.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
    }
}
