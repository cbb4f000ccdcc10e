//! Error types for the master-key vault and the streaming cryptor.

use thiserror::Error;

/// A malformed or unsupported structural input to the cryptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherStructuralKind {
    /// `EncryptMetadata::algorithm` named something other than AES-256-CTR.
    UnsupportedAlgorithm,
    /// No source has been attached via `set_source` yet.
    MissingSource,
    /// The wrapped key blob is shorter than one IV plus one AES block.
    MalformedWrap,
    /// `seek` was called on a cryptor whose source does not implement
    /// `Seek`.
    NotSeekable,
    /// `SeekFrom::End` was used but the source's size could not be
    /// determined.
    MissingSizeForSeekFromEnd,
    /// The requested seek would land before the start of the stream.
    NegativePosition,
}

impl std::fmt::Display for CipherStructuralKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::UnsupportedAlgorithm => "unsupported encryption algorithm",
            Self::MissingSource => "no source attached to cryptor",
            Self::MalformedWrap => "wrapped key blob is malformed",
            Self::NotSeekable => "source does not support seeking",
            Self::MissingSizeForSeekFromEnd => "source size unavailable for SeekFrom::End",
            Self::NegativePosition => "seek would result in a negative position",
        };
        f.write_str(message)
    }
}

/// Errors produced by [`crate::vault`] and [`crate::cryptor`].
///
/// Structural errors are returned synchronously without mutating cursor
/// state, so a failed `seek` or `read` leaves the cryptor at its prior
/// position.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A structural precondition was violated.
    #[error("{0}")]
    Structural(CipherStructuralKind),

    /// The underlying byte source failed.
    #[error("source I/O failed")]
    Io(#[from] std::io::Error),

    /// No master-key backend produced a key.
    #[error("master key is unavailable")]
    MasterKeyUnavailable,
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
