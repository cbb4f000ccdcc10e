//! Error types for the settings store.

use thiserror::Error;

/// Result alias for settings store operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while reading or writing settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested setting key has no value recorded.
    #[error("setting '{key}' is not configured")]
    Missing {
        /// Setting key that was requested.
        key: String,
    },
    /// The backing store could not be reached or returned an unexpected error.
    #[error("settings store unavailable")]
    Unavailable {
        /// Underlying error from the backing store.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
