//! Durable buffering contract for events published to an offline subscriber.
//!
//! The production store (Postgres-backed, per spec §6) is an external
//! collaborator; database entity mapping is out of scope here.
//! [`InMemoryDurableStore`] is a test double only.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::event::Event;

/// Durable buffer for events addressed to a subscriber that is currently
/// offline, keyed by `(user_id, subscriber_id)`.
///
/// `create` appends a whole batch of events in one write (a subscriber's
/// entire pending buffer, per spec §4.2); `take_by_subscriber` drains and
/// returns the buffered events in arrival order (used on reconnect);
/// `delete_by_subscriber` and `delete_all` support the `close` path and hub
/// startup.
#[async_trait]
pub trait DurableEventStore: Send + Sync {
    /// Persist `events` for later delivery to `subscriber_id`, owned by
    /// `user_id`, as a single batched write.
    async fn create(&self, user_id: i64, subscriber_id: &str, events: Vec<Event>) -> Result<()>;

    /// Drain and return every event buffered for `subscriber_id` owned by
    /// `user_id`, oldest first, removing them from the store.
    async fn take_by_subscriber(&self, subscriber_id: &str, user_id: i64) -> Result<Vec<Event>>;

    /// Discard every event buffered for `subscriber_id` without returning
    /// them.
    async fn delete_by_subscriber(&self, subscriber_id: &str) -> Result<()>;

    /// Discard every event buffered for every subscriber. Invoked once at
    /// hub startup to discard stale records.
    async fn delete_all(&self) -> Result<()>;
}

/// In-memory [`DurableEventStore`] used for tests; not the production
/// implementation.
#[derive(Clone, Default)]
pub struct InMemoryDurableStore {
    buffers: Arc<RwLock<HashMap<(i64, String), Vec<Event>>>>,
}

impl InMemoryDurableStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableEventStore for InMemoryDurableStore {
    async fn create(&self, user_id: i64, subscriber_id: &str, events: Vec<Event>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.buffers
            .write()
            .await
            .entry((user_id, subscriber_id.to_string()))
            .or_default()
            .extend(events);
        Ok(())
    }

    async fn take_by_subscriber(&self, subscriber_id: &str, user_id: i64) -> Result<Vec<Event>> {
        Ok(self
            .buffers
            .write()
            .await
            .remove(&(user_id, subscriber_id.to_string()))
            .unwrap_or_default())
    }

    async fn delete_by_subscriber(&self, subscriber_id: &str) -> Result<()> {
        self.buffers
            .write()
            .await
            .retain(|(_, id), _| id != subscriber_id);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        self.buffers.write().await.clear();
        Ok(())
    }
}
