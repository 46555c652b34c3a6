use std::path::Path;

use serde::Deserialize;

use crate::{crypto::keys::Ed25519SigningKey, error::Error};

/// The environment inputs a caller injects when constructing the pieces of
/// this crate that need to know who "we" are: the server's own name, which
/// of its signing keys is current, and the key material itself.
///
/// The core never reads this from a file or environment variable on its
/// own — per the external-interfaces design, "the core exposes no ambient
/// configuration". `HomeserverConfig` exists so that a binary embedding
/// this crate has one obvious place to load it from (here, TOML, matching
/// the teacher's `Config`) before handing the pieces to
/// [`crate::federation::keys::KeyStore`] and
/// [`crate::federation::signing::RequestSigner`].
#[derive(Debug, Deserialize)]
pub struct HomeserverConfig {
    /// This server's canonical name, as it appears in `sender`/`origin`
    /// fields and as the `destination` federation peers must address.
    pub server_name: String,
    /// The key ID (e.g. `ed25519:a_VGBj`) of the signing key below.
    pub signing_key_id: String,
    /// Path to a PKCS#8-encoded Ed25519 private key, relative to the
    /// directory the config file was loaded from if not absolute.
    pub signing_key_path: String,
    /// Outbound federation key-fetch timeout, in seconds. Defaults to 10
    /// per the concurrency model's resource budget.
    #[serde(default = "default_key_fetch_timeout_secs")]
    pub key_fetch_timeout_secs: u64,
}

fn default_key_fetch_timeout_secs() -> u64 {
    10
}

impl HomeserverConfig {
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let contents = tokio::fs::read(path).await.map_err(|e| {
            crate::error::ErrorKind::InvalidEvent(format!("failed to read config {}: {}", path.display(), e))
        })?;
        let config: HomeserverConfig = toml::from_slice(&contents)
            .map_err(|e| crate::error::ErrorKind::InvalidEvent(format!("invalid config: {}", e)))?;
        Ok(config)
    }

    /// Resolves `signing_key_path` against `base` if it is relative, then
    /// loads the key.
    pub async fn load_signing_key(&self, base: &Path) -> Result<Ed25519SigningKey, Error> {
        let path = Path::new(&self.signing_key_path);
        let path = if path.is_relative() { base.join(path) } else { path.to_path_buf() };
        Ed25519SigningKey::load_pkcs8(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::HomeserverConfig;

    #[test]
    fn deserializes_with_default_timeout() {
        let config: HomeserverConfig = toml::from_str(
            r#"
            server_name = "example.org"
            signing_key_id = "ed25519:a_VGBj"
            signing_key_path = "keys/ed25519_a_VGBj.pk8"
            "#,
        )
        .unwrap();
        assert_eq!(config.server_name, "example.org");
        assert_eq!(config.key_fetch_timeout_secs, 10);
    }

    #[test]
    fn deserializes_with_explicit_timeout() {
        let config: HomeserverConfig = toml::from_str(
            r#"
            server_name = "example.org"
            signing_key_id = "ed25519:a_VGBj"
            signing_key_path = "keys/ed25519_a_VGBj.pk8"
            key_fetch_timeout_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.key_fetch_timeout_secs, 30);
    }
}
