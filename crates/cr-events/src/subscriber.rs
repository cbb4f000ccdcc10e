//! A single subscriber's buffering, debounce, and delivery state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cr_telemetry::Metrics;
use tokio::sync::{mpsc, Mutex};
use tracing::error;

use crate::algebra::normalize;
use crate::durable::DurableEventStore;
use crate::error::Result;
use crate::event::Event;
use crate::user::{User, UserRepository};

/// Default debounce window between a subscriber's first buffered event and
/// its coalesced delivery.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(5);

/// Default validity window for a subscriber's cached owner before it is
/// reloaded from the user repository.
pub const DEFAULT_OWNER_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Capacity of a subscriber's live-delivery channel. A full channel means
/// the subscriber is not draining fast enough; the event is dropped
/// silently rather than blocking the publisher.
pub const CHANNEL_CAPACITY: usize = 16;

struct Inner {
    buffer: Vec<Event>,
    /// Bumped on every publish and on any timer cancellation; a debounce
    /// callback compares its captured generation against the current one
    /// and is a no-op on mismatch, so a stale (already-cancelled) callback
    /// that fires anyway cannot act on behalf of a newer arm.
    timer_generation: u64,
    online: bool,
    offline_since: Option<DateTime<Utc>>,
    owner_cache: Option<(User, DateTime<Utc>)>,
    closed: bool,
    /// `None` once [`Subscriber::close`] has run; dropping the sender here
    /// is what makes the matching receiver observe channel-close.
    sender: Option<mpsc::Sender<Event>>,
}

/// One client's subscription to a topic.
///
/// Buffers incoming events for [`debounce_window`](Subscriber::debounce_window),
/// coalesces them through the event algebra, then delivers the result
/// either live (over a bounded channel) or durably (when offline).
pub struct Subscriber {
    id: String,
    user_id: i64,
    durable: Arc<dyn DurableEventStore>,
    user_repository: Arc<dyn UserRepository>,
    metrics: Metrics,
    debounce_window: Duration,
    owner_cache_ttl: Duration,
    inner: Mutex<Inner>,
}

impl Subscriber {
    /// Construct a new subscriber, returning it alongside the receiving end
    /// of its live-delivery channel.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        user_id: i64,
        durable: Arc<dyn DurableEventStore>,
        user_repository: Arc<dyn UserRepository>,
        metrics: Metrics,
    ) -> (Arc<Self>, mpsc::Receiver<Event>) {
        Self::with_windows(
            id,
            user_id,
            durable,
            user_repository,
            metrics,
            DEFAULT_DEBOUNCE_WINDOW,
            DEFAULT_OWNER_CACHE_TTL,
        )
    }

    /// Construct a subscriber with explicit debounce and owner-cache
    /// windows, for tests that cannot wait out the production defaults.
    #[must_use]
    pub fn with_windows(
        id: impl Into<String>,
        user_id: i64,
        durable: Arc<dyn DurableEventStore>,
        user_repository: Arc<dyn UserRepository>,
        metrics: Metrics,
        debounce_window: Duration,
        owner_cache_ttl: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let subscriber = Arc::new(Self {
            id: id.into(),
            user_id,
            durable,
            user_repository,
            metrics,
            debounce_window,
            owner_cache_ttl,
            inner: Mutex::new(Inner {
                buffer: Vec::new(),
                timer_generation: 0,
                online: true,
                offline_since: None,
                owner_cache: None,
                closed: false,
                sender: Some(sender),
            }),
        });
        (subscriber, receiver)
    }

    /// Stable identifier for this subscriber.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The user id this subscriber was created for.
    #[must_use]
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Buffer one raw event and (re)arm the debounce timer.
    ///
    /// Events are not delivered synchronously; they are coalesced through
    /// the event algebra and delivered once the debounce window elapses
    /// with no further `publish` calls for this subscriber. No-op when
    /// closed.
    pub async fn publish(self: &Arc<Self>, event: Event) {
        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return;
            }
            inner.buffer.push(event);
            inner.timer_generation += 1;
            inner.timer_generation
        };

        let subscriber = Arc::clone(self);
        let window = self.debounce_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            subscriber.fire_debounce(generation).await;
        });
    }

    async fn fire_debounce(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.closed || inner.timer_generation != generation {
            return;
        }
        self.flush_locked(&mut inner).await;
    }

    /// Coalesce and deliver everything currently buffered, regardless of
    /// whether the debounce window has elapsed. No-op if the buffer is
    /// empty or the subscriber is closed.
    pub async fn flush(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        self.flush_locked(&mut inner).await;
    }

    async fn flush_locked(&self, inner: &mut Inner) {
        if inner.buffer.is_empty() {
            return;
        }
        if inner.online {
            let events = normalize(&inner.buffer);
            inner.buffer.clear();
            if let Some(sender) = &inner.sender {
                for event in events {
                    if sender.try_send(event).is_ok() {
                        self.metrics.inc_event_delivered();
                    } else {
                        self.metrics.inc_event_dropped();
                    }
                }
            }
            return;
        }

        // Offline: persist the raw, un-algebra'd buffer as one batched
        // write (spec §4.2) rather than compressing it; the subscriber
        // may reconnect with more events still to come for the same file.
        let events = std::mem::take(&mut inner.buffer);
        match self.durable.create(self.user_id, &self.id, events).await {
            Ok(()) => self.metrics.inc_flush_persisted(),
            Err(source) => {
                self.metrics.inc_durable_store_error();
                error!(subscriber_id = %self.id, error = %source, "durable store unavailable during flush");
            }
        }
    }

    /// Mark this subscriber online, issuing a fresh live-delivery channel
    /// and draining any events that accumulated in durable storage while
    /// it was offline onto it.
    ///
    /// A fresh channel is necessary rather than reusing the prior one: by
    /// the time a client reconnects, whatever previously held the matching
    /// `Receiver` is gone (the point of going offline). The subscriber's
    /// buffer, debounce state, and durable backlog are what's actually
    /// continuous across the reconnect.
    ///
    /// # Errors
    ///
    /// Propagates a durable-store failure while loading the backlog.
    pub async fn set_online(self: &Arc<Self>) -> Result<mpsc::Receiver<Event>> {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        {
            let mut inner = self.inner.lock().await;
            inner.online = true;
            inner.offline_since = None;
            inner.owner_cache = None;
            inner.sender = Some(sender);
        }

        let backlog = self.durable.take_by_subscriber(&self.id, self.user_id).await?;
        if !backlog.is_empty() {
            let generation = {
                let mut inner = self.inner.lock().await;
                // `backlog` was persisted before this reconnect; anything
                // already sitting in `buffer` was published more recently
                // (within the debounce window right before `set_online`
                // ran) and must stay after it to preserve first-appearance
                // order through the algebra.
                let mut merged = backlog;
                merged.append(&mut inner.buffer);
                inner.buffer = merged;
                inner.timer_generation += 1;
                inner.timer_generation
            };
            let subscriber = Arc::clone(self);
            let window = self.debounce_window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                subscriber.fire_debounce(generation).await;
            });
        }

        Ok(receiver)
    }

    /// Mark this subscriber offline as of now, cancel its timer, and flush
    /// immediately (which persists to durable storage, since offline).
    pub async fn set_offline(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        inner.online = false;
        inner.offline_since = Some(Utc::now());
        inner.timer_generation += 1;
        self.flush_locked(&mut inner).await;
    }

    /// How long this subscriber has been continuously offline, if at all.
    pub async fn offline_since(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.offline_since
    }

    /// Whether this subscriber is currently online.
    pub async fn online(&self) -> bool {
        self.inner.lock().await.online
    }

    /// Snapshot of the currently buffered, not-yet-flushed raw events.
    pub async fn buffer_snapshot(&self) -> Vec<Event> {
        self.inner.lock().await.buffer.clone()
    }

    /// Cancel this subscriber's debounce timer without flushing or closing
    /// it. The first half of the cooperative `unsubscribe` sequence
    /// (stop-then-`set_offline`): buffered events survive and will persist
    /// to durable storage when `set_offline` flushes them.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.timer_generation += 1;
    }

    /// Permanently close this subscriber: cancel the timer, discard any
    /// buffered events without flushing them, drop the live channel (so
    /// its receiver observes closure), and remove durable records for this
    /// subscriber. Terminal: further `publish` calls are ignored.
    pub async fn close(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.timer_generation += 1;
            inner.buffer.clear();
            inner.sender = None;
            inner.closed = true;
        }
        if let Err(source) = self.durable.delete_by_subscriber(&self.id).await {
            error!(subscriber_id = %self.id, error = %source, "failed to remove durable records on close");
        }
    }

    /// Whether `close` has been called on this subscriber.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Resolve the user that owns this subscriber, reloading from the user
    /// repository when the cached value is absent or has expired.
    pub async fn owner(&self) -> Result<User> {
        let mut inner = self.inner.lock().await;
        if let Some((user, cached_at)) = &inner.owner_cache {
            let age = Utc::now().signed_duration_since(*cached_at);
            if age.to_std().unwrap_or(Duration::MAX) < self.owner_cache_ttl {
                return Ok(user.clone());
            }
        }
        let user = self.user_repository.load(self.user_id).await?;
        inner.owner_cache = Some((user.clone(), Utc::now()));
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::InMemoryDurableStore;
    use crate::event::EventType;
    use crate::user::InMemoryUserRepository;

    fn test_deps() -> (Arc<dyn DurableEventStore>, Arc<dyn UserRepository>, Metrics) {
        (
            Arc::new(InMemoryDurableStore::new()),
            Arc::new(InMemoryUserRepository::with_user(User {
                id: 1,
                name: "ada".to_string(),
            })),
            Metrics::new().expect("metrics registry"),
        )
    }

    #[tokio::test]
    async fn debounced_publish_coalesces_before_delivery() {
        let (durable, users, metrics) = test_deps();
        let (subscriber, mut receiver) = Subscriber::with_windows(
            "sub-1",
            1,
            durable,
            users,
            metrics,
            Duration::from_millis(20),
            DEFAULT_OWNER_CACHE_TTL,
        );

        subscriber
            .publish(Event::new(EventType::Create, "7", "/f"))
            .await;
        subscriber
            .publish(Event::new(EventType::Modify, "7", "/f"))
            .await;

        let delivered = tokio::time::timeout(Duration::from_millis(200), receiver.recv())
            .await
            .expect("debounce window elapsed")
            .expect("channel open");
        assert_eq!(delivered.kind, EventType::Create);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_events_are_buffered_durably_and_delivered_on_reconnect() {
        let (durable, users, metrics) = test_deps();
        let (subscriber, _first_receiver) = Subscriber::with_windows(
            "sub-1",
            1,
            durable,
            users,
            metrics,
            Duration::from_millis(10),
            DEFAULT_OWNER_CACHE_TTL,
        );

        subscriber.set_offline().await;
        subscriber
            .publish(Event::new(EventType::Create, "7", "/f"))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut receiver = subscriber.set_online().await.unwrap();
        let delivered = receiver.recv().await.expect("channel open");
        assert_eq!(delivered.file_id, "7");
    }

    #[tokio::test]
    async fn closed_subscriber_ignores_further_publishes_and_closes_the_channel() {
        let (durable, users, metrics) = test_deps();
        let (subscriber, mut receiver) = Subscriber::with_windows(
            "sub-1",
            1,
            durable,
            users,
            metrics,
            Duration::from_millis(10),
            DEFAULT_OWNER_CACHE_TTL,
        );

        subscriber.close().await;
        subscriber
            .publish(Event::new(EventType::Create, "7", "/f"))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(receiver.recv().await.is_none());
        assert!(subscriber.is_closed().await);
    }

    #[tokio::test]
    async fn stop_cancels_the_timer_but_keeps_the_buffer_for_set_offline_to_persist() {
        let (durable, users, metrics) = test_deps();
        let durable_clone = Arc::clone(&durable);
        let (subscriber, mut receiver) = Subscriber::with_windows(
            "sub-1",
            1,
            durable,
            users,
            metrics,
            Duration::from_millis(20),
            DEFAULT_OWNER_CACHE_TTL,
        );

        subscriber
            .publish(Event::new(EventType::Create, "7", "/f"))
            .await;
        subscriber.stop().await;
        subscriber.set_offline().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(receiver.try_recv().is_err());
        assert_eq!(
            durable_clone.take_by_subscriber("sub-1", 1).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn owner_reloads_after_cache_expiry() {
        let (durable, _, metrics) = test_deps();
        let users: Arc<dyn UserRepository> =
            Arc::new(InMemoryUserRepository::with_user(User {
                id: 1,
                name: "ada".to_string(),
            }));
        let (subscriber, _receiver) = Subscriber::with_windows(
            "sub-1",
            1,
            durable,
            users,
            metrics,
            DEFAULT_DEBOUNCE_WINDOW,
            Duration::from_millis(10),
        );

        let first = subscriber.owner().await.unwrap();
        assert_eq!(first.name, "ada");
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = subscriber.owner().await.unwrap();
        assert_eq!(second, first);
    }
}
