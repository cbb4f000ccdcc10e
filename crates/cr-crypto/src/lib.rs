#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::multiple_crate_versions)]

//! AES-256-CTR per-object key wrapping and a seekable streaming cryptor.
//!
//! Layout: `counter` (128-bit big-endian CTR arithmetic), `cipher`
//! (keystream application), `metadata` (per-object key wrap/unwrap),
//! `cryptor` (the seekable read/seek cursor), `vault` (master-key
//! backends), `error`.

pub mod cipher;
pub mod counter;
pub mod cryptor;
pub mod error;
pub mod metadata;
pub mod vault;

pub use cryptor::{Cryptor, CryptorSource};
pub use error::{CipherStructuralKind, CryptoError, Result};
pub use metadata::{EncryptMetadata, ALGORITHM};
pub use vault::{EnvVault, FileVault, MasterKeyVault, SettingsVault};
