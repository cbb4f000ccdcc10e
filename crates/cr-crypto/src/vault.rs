//! Master-key retrieval: the key used to wrap every object's per-object
//! key. Three backends are in scope here; a dedicated enterprise
//! secrets-manager integration is a separate, external concern.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::OnceCell;

use cr_config::SettingsStore;

use crate::error::{CryptoError, Result};

/// Environment variable read by [`EnvVault`].
pub const MASTER_KEY_ENV_VAR: &str = "CR_ENCRYPT_MASTER_KEY";

/// Settings key read by [`SettingsVault`].
pub const MASTER_KEY_SETTING_NAME: &str = "cr.encrypt.master_key";

fn decode_key(encoded: &str) -> Result<[u8; 32]> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|_| CryptoError::MasterKeyUnavailable)?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::MasterKeyUnavailable)
}

/// Supplies the 32-byte AES-256 master key used to wrap per-object keys.
///
/// Implementations cache the decoded key after its first successful read;
/// the key is not expected to rotate within a process lifetime.
pub trait MasterKeyVault: Send + Sync {
    /// Return the master key, reading and caching it on first use.
    fn get_master_key(&self) -> Result<[u8; 32]>;
}

/// Reads the master key from a [`SettingsStore`], base64-decoded.
pub struct SettingsVault {
    store: Arc<dyn SettingsStore>,
    cache: OnceCell<[u8; 32]>,
}

impl SettingsVault {
    /// Construct a vault backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            cache: OnceCell::new(),
        }
    }
}

impl MasterKeyVault for SettingsVault {
    fn get_master_key(&self) -> Result<[u8; 32]> {
        if let Some(key) = self.cache.get() {
            return Ok(*key);
        }
        // `get_master_key` is a sync trait method (vaults are consumed from
        // the cryptor's sync read/seek path) but `SettingsStore` is async.
        // Bridge onto a dedicated thread with its own runtime rather than
        // risking a nested-runtime panic by calling `block_on` from
        // whatever context the caller is already in.
        let store = Arc::clone(&self.store);
        let encoded = std::thread::scope(|scope| {
            scope
                .spawn(move || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .map_err(|_| CryptoError::MasterKeyUnavailable)?;
                    runtime
                        .block_on(store.get_secret(MASTER_KEY_SETTING_NAME))
                        .map_err(|_| CryptoError::MasterKeyUnavailable)
                })
                .join()
                .map_err(|_| CryptoError::MasterKeyUnavailable)?
        })?
        .ok_or(CryptoError::MasterKeyUnavailable)?;
        let key = decode_key(&encoded)?;
        Ok(*self.cache.get_or_init(|| key))
    }
}

/// Reads the master key from the [`MASTER_KEY_ENV_VAR`] environment
/// variable, base64-decoded.
#[derive(Default)]
pub struct EnvVault {
    cache: OnceCell<[u8; 32]>,
}

impl EnvVault {
    /// Construct a new, uncached vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MasterKeyVault for EnvVault {
    fn get_master_key(&self) -> Result<[u8; 32]> {
        if let Some(key) = self.cache.get() {
            return Ok(*key);
        }
        let encoded = env::var(MASTER_KEY_ENV_VAR).map_err(|_| CryptoError::MasterKeyUnavailable)?;
        let key = decode_key(&encoded)?;
        Ok(*self.cache.get_or_init(|| key))
    }
}

/// Reads the master key from a file path, base64-decoded.
pub struct FileVault {
    path: PathBuf,
    cache: OnceCell<[u8; 32]>,
}

impl FileVault {
    /// Construct a vault that reads its key from `path` on first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: OnceCell::new(),
        }
    }
}

impl MasterKeyVault for FileVault {
    fn get_master_key(&self) -> Result<[u8; 32]> {
        if let Some(key) = self.cache.get() {
            return Ok(*key);
        }
        let encoded =
            std::fs::read_to_string(&self.path).map_err(|_| CryptoError::MasterKeyUnavailable)?;
        let key = decode_key(&encoded)?;
        Ok(*self.cache.get_or_init(|| key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_config::InMemorySettingsStore;

    fn encoded_key(byte: u8) -> String {
        BASE64.encode([byte; 32])
    }

    #[test]
    fn file_vault_reads_and_caches() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), encoded_key(0x11)).unwrap();
        let vault = FileVault::new(file.path());
        assert_eq!(vault.get_master_key().unwrap(), [0x11; 32]);
        std::fs::write(file.path(), encoded_key(0x22)).unwrap();
        assert_eq!(vault.get_master_key().unwrap(), [0x11; 32]);
    }

    #[test]
    fn decode_key_rejects_invalid_base64() {
        assert!(matches!(
            decode_key("not valid base64!!"),
            Err(CryptoError::MasterKeyUnavailable)
        ));
    }

    #[test]
    fn decode_key_rejects_wrong_length() {
        assert!(matches!(
            decode_key(&BASE64.encode([0u8; 16])),
            Err(CryptoError::MasterKeyUnavailable)
        ));
    }

    #[test]
    fn settings_vault_reads_from_the_store() {
        let store: Arc<dyn SettingsStore> = Arc::new(InMemorySettingsStore::with_value(
            MASTER_KEY_SETTING_NAME,
            encoded_key(0x33),
        ));
        let vault = SettingsVault::new(store);
        assert_eq!(vault.get_master_key().unwrap(), [0x33; 32]);
    }
}
