//! Per-object encryption metadata: the content IV plus the file key
//! wrapped under the master key.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, error};
use zeroize::Zeroizing;

use crate::cipher::apply_keystream;
use crate::counter::BLOCK_SIZE;
use crate::error::{CipherStructuralKind, CryptoError, Result};
use crate::vault::MasterKeyVault;

/// The only algorithm identifier this cryptor recognizes.
pub const ALGORITHM: &str = "AES-256-CTR";

/// Length in bytes of an AES-256 file key.
const FILE_KEY_LEN: usize = 32;

/// Length of the wrapped key blob: one wrap IV followed by one ciphertext
/// byte per plaintext byte (`[16-byte wrap IV][32-byte ciphertext]`).
const WRAPPED_KEY_LEN: usize = BLOCK_SIZE + FILE_KEY_LEN;

/// Per-object encryption metadata.
///
/// `key` is the wrapped ciphertext framed `[16-byte wrap IV][ciphertext]`;
/// `key_plaintext`, once resolved, caches the unwrapped file key in memory
/// so repeated reads don't re-run the unwrap. It is never serialized.
#[derive(Debug, Clone)]
pub struct EncryptMetadata {
    /// Algorithm identifier; must equal [`ALGORITHM`].
    pub algorithm: String,
    /// 16-byte IV used for content encryption, distinct from the wrap IV
    /// embedded in `key`.
    pub iv: [u8; BLOCK_SIZE],
    /// Wrapped file key, framed `[16-byte wrap IV][ciphertext]`.
    pub key: Vec<u8>,
    /// Unwrapped file key, cached in memory only.
    pub key_plaintext: Option<Zeroizing<[u8; FILE_KEY_LEN]>>,
}

/// On-disk/wire shape: `{"algorithm","iv","key"}` with `iv`/`key` base64.
#[derive(Serialize, Deserialize)]
struct Wire {
    algorithm: String,
    iv: String,
    key: String,
}

impl Serialize for EncryptMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        Wire {
            algorithm: self.algorithm.clone(),
            iv: BASE64.encode(self.iv),
            key: BASE64.encode(&self.key),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EncryptMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = Wire::deserialize(deserializer)?;
        let iv_bytes = BASE64.decode(&wire.iv).map_err(serde::de::Error::custom)?;
        let iv: [u8; BLOCK_SIZE] = iv_bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("iv must be 16 bytes"))?;
        let key = BASE64.decode(&wire.key).map_err(serde::de::Error::custom)?;
        Ok(Self {
            algorithm: wire.algorithm,
            iv,
            key,
            key_plaintext: None,
        })
    }
}

impl EncryptMetadata {
    /// Generate fresh metadata for a new object: a random 32-byte file key
    /// and 16-byte content IV, with the file key wrapped under `vault`'s
    /// master key using a freshly drawn wrap IV.
    ///
    /// # Errors
    ///
    /// Propagates [`CryptoError::MasterKeyUnavailable`] if `vault` cannot
    /// supply the master key.
    pub fn generate(vault: &dyn MasterKeyVault) -> Result<Self> {
        let master_key = vault.get_master_key().inspect_err(|source| {
            error!(error = %source, "master key unavailable while generating metadata");
        })?;

        let mut file_key = [0u8; FILE_KEY_LEN];
        OsRng.fill_bytes(&mut file_key);
        let mut content_iv = [0u8; BLOCK_SIZE];
        OsRng.fill_bytes(&mut content_iv);
        let mut wrap_iv = [0u8; BLOCK_SIZE];
        OsRng.fill_bytes(&mut wrap_iv);

        let wrapped = wrap_key(&master_key, wrap_iv, &file_key);
        debug!(algorithm = ALGORITHM, "generated fresh object encryption metadata");

        Ok(Self {
            algorithm: ALGORITHM.to_string(),
            iv: content_iv,
            key: wrapped,
            key_plaintext: Some(Zeroizing::new(file_key)),
        })
    }

    /// Resolve the plaintext file key: if one is already cached in memory,
    /// adopt it verbatim, otherwise unwrap `key` under `vault`'s master key
    /// and cache the result.
    ///
    /// # Errors
    ///
    /// Fails with [`CryptoError::Structural`] if the algorithm is
    /// unsupported or the wrapped blob is malformed, or with
    /// [`CryptoError::MasterKeyUnavailable`] if the master key cannot be
    /// loaded.
    pub fn file_key(&mut self, vault: &dyn MasterKeyVault) -> Result<[u8; FILE_KEY_LEN]> {
        if self.algorithm != ALGORITHM {
            error!(algorithm = %self.algorithm, "unsupported algorithm while unwrapping file key");
            return Err(CryptoError::Structural(
                CipherStructuralKind::UnsupportedAlgorithm,
            ));
        }
        if let Some(cached) = &self.key_plaintext {
            return Ok(**cached);
        }
        let master_key = vault.get_master_key().inspect_err(|source| {
            error!(error = %source, "master key unavailable while unwrapping file key");
        })?;
        let file_key = unwrap_key(&master_key, &self.key).inspect_err(|source| {
            error!(error = %source, "failed to unwrap file key");
        })?;
        self.key_plaintext = Some(Zeroizing::new(file_key));
        debug!("unwrapped file key and cached plaintext");
        Ok(file_key)
    }
}

/// Wrap `file_key` under `master_key` using AES-256-CTR with `wrap_iv`,
/// framed as `[wrap_iv][ciphertext]`.
fn wrap_key(
    master_key: &[u8; 32],
    wrap_iv: [u8; BLOCK_SIZE],
    file_key: &[u8; FILE_KEY_LEN],
) -> Vec<u8> {
    let mut ciphertext = file_key.to_vec();
    apply_keystream(master_key, wrap_iv, 0, &mut ciphertext);
    let mut wrapped = Vec::with_capacity(WRAPPED_KEY_LEN);
    wrapped.extend_from_slice(&wrap_iv);
    wrapped.extend_from_slice(&ciphertext);
    wrapped
}

/// Unwrap a `[wrap_iv][ciphertext]`-framed blob back into the plaintext
/// file key.
fn unwrap_key(master_key: &[u8; 32], wrapped: &[u8]) -> Result<[u8; FILE_KEY_LEN]> {
    if wrapped.len() != WRAPPED_KEY_LEN {
        return Err(CryptoError::Structural(CipherStructuralKind::MalformedWrap));
    }
    let wrap_iv: [u8; BLOCK_SIZE] = wrapped[..BLOCK_SIZE]
        .try_into()
        .expect("checked length above");
    let mut plaintext = wrapped[BLOCK_SIZE..].to_vec();
    apply_keystream(master_key, wrap_iv, 0, &mut plaintext);
    plaintext
        .try_into()
        .map_err(|_| CryptoError::Structural(CipherStructuralKind::MalformedWrap))
}
