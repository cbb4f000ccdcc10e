//! Error types for the event pipeline.

use thiserror::Error;

/// Errors surfaced by [`crate::hub::EventHub`] and [`crate::subscriber::Subscriber`].
///
/// Delivery failures that the spec defines as silent (a full live channel,
/// a duplicate `Delete`) are not variants here; they never propagate.
#[derive(Debug, Error)]
pub enum EventsError {
    /// An operation was attempted on a hub that has already been closed.
    #[error("event hub is closed")]
    ClosedHub,

    /// A subscriber's owner could not be resolved because no user context
    /// was available to reload it.
    #[error("no auth context available to resolve subscriber owner")]
    AuthContextMissing,

    /// The durable store failed while flushing a subscriber's buffer.
    ///
    /// Logged at the call site via `tracing::error!`; the in-memory buffer
    /// is cleared regardless so a single flaky write cannot wedge delivery.
    #[error("durable event store was unavailable during flush")]
    DurableStoreTransient {
        /// Underlying store failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, EventsError>;
