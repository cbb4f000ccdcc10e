//! Topic-indexed pub/sub hub tying subscribers to the folders they watch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cr_telemetry::Metrics;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::durable::DurableEventStore;
use crate::error::{EventsError, Result};
use crate::event::{Event, EventType};
use crate::subscriber::Subscriber;
use crate::user::UserRepository;

/// Folder identifier events are published against.
pub type Topic = i64;

/// Default interval between sweeper passes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default maximum continuous-offline duration before a subscriber is
/// evicted by the sweeper.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(14 * 24 * 60 * 60);

struct HubState {
    topics: HashMap<Topic, HashMap<String, Arc<Subscriber>>>,
}

/// Outcome of [`EventHub::subscribe`].
pub struct SubscribeOutcome {
    /// Handle to the (possibly reactivated) subscriber.
    pub subscriber: Arc<Subscriber>,
    /// Receiving end of the subscriber's live-delivery channel. Always a
    /// freshly minted channel: reactivation issues a new pair rather than
    /// reusing one whose original receiver is long gone.
    pub receiver: mpsc::Receiver<Event>,
    /// `true` if this call reactivated an existing, still-registered
    /// subscriber rather than creating a new one.
    pub resumed: bool,
}

/// Owns every live subscriber, indexed by the topic(s) it watches.
///
/// The topic map is guarded by an `RwLock` held only long enough to look up
/// or mutate the map itself; subscriber I/O (`publish`, `flush`) always
/// happens after the lock is released, per the concurrency model's
/// requirement that the hub lock never be held across subscriber I/O.
pub struct EventHub {
    state: RwLock<HubState>,
    durable: Arc<dyn DurableEventStore>,
    user_repository: Arc<dyn UserRepository>,
    metrics: Metrics,
    expiry: Duration,
    closed: AtomicBool,
    shutdown: Notify,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl EventHub {
    /// Construct a hub and start its background sweeper task.
    ///
    /// Discards any durable records left over from a previous process at
    /// startup (fire-and-forget; a transient failure here is logged and
    /// otherwise harmless, since stale records simply age out via the
    /// sweeper's ordinary expiry path instead).
    #[must_use]
    pub fn new(
        durable: Arc<dyn DurableEventStore>,
        user_repository: Arc<dyn UserRepository>,
        metrics: Metrics,
    ) -> Arc<Self> {
        Self::with_windows(durable, user_repository, metrics, DEFAULT_SWEEP_INTERVAL, DEFAULT_EXPIRY)
    }

    /// Construct a hub with explicit sweep interval and expiry, for tests
    /// that cannot wait out the production defaults.
    #[must_use]
    pub fn with_windows(
        durable: Arc<dyn DurableEventStore>,
        user_repository: Arc<dyn UserRepository>,
        metrics: Metrics,
        sweep_interval: Duration,
        expiry: Duration,
    ) -> Arc<Self> {
        let hub = Arc::new(Self {
            state: RwLock::new(HubState {
                topics: HashMap::new(),
            }),
            durable,
            user_repository,
            metrics,
            expiry,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            sweeper: std::sync::Mutex::new(None),
        });

        let startup_durable = Arc::clone(&hub.durable);
        tokio::spawn(async move {
            if let Err(source) = startup_durable.delete_all().await {
                error!(error = %source, "failed to discard stale durable records at startup");
            }
        });

        let sweeper_hub = Arc::clone(&hub);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(sweep_interval) => {
                        sweeper_hub.sweep().await;
                    }
                    () = sweeper_hub.shutdown.notified() => {
                        return;
                    }
                }
            }
        });
        *hub.sweeper.lock().expect("sweeper mutex is never poisoned") = Some(handle);

        hub
    }

    /// Register or reactivate a subscriber for `topic` under the given
    /// `user_id`.
    ///
    /// If a live (not-yet-closed) subscriber already holds this id in this
    /// topic, it is reactivated via `set_online` and `resumed=true` is
    /// returned. If a closed subscriber occupies the id, it is evicted and
    /// a fresh subscriber takes its place. Otherwise a new subscriber is
    /// created bound to `user_id`.
    pub async fn subscribe(
        self: &Arc<Self>,
        topic: Topic,
        subscriber_id: impl Into<String>,
        user_id: i64,
    ) -> Result<SubscribeOutcome> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventsError::ClosedHub);
        }
        let subscriber_id = subscriber_id.into();

        let existing = {
            let state = self.state.read().await;
            state
                .topics
                .get(&topic)
                .and_then(|subscribers| subscribers.get(&subscriber_id))
                .cloned()
        };

        if let Some(subscriber) = existing {
            if subscriber.is_closed().await {
                let mut state = self.state.write().await;
                if let Some(subscribers) = state.topics.get_mut(&topic) {
                    subscribers.remove(&subscriber_id);
                }
            } else {
                let receiver = subscriber.set_online().await?;
                debug!(topic, subscriber_id = subscriber.id(), "resumed");
                return Ok(SubscribeOutcome {
                    subscriber,
                    receiver,
                    resumed: true,
                });
            }
        }

        let (subscriber, receiver) = Subscriber::new(
            subscriber_id,
            user_id,
            Arc::clone(&self.durable),
            Arc::clone(&self.user_repository),
            self.metrics.clone(),
        );

        let mut state = self.state.write().await;
        state
            .topics
            .entry(topic)
            .or_default()
            .insert(subscriber.id().to_string(), Arc::clone(&subscriber));
        debug!(topic, subscriber_id = subscriber.id(), "subscribed");
        self.metrics.set_subscribers_active(self.active_count(&state));

        Ok(SubscribeOutcome {
            subscriber,
            receiver,
            resumed: false,
        })
    }

    /// Transition a subscriber to offline without removing it from the
    /// registry: cancels its timer then flushes (persisting any buffered
    /// events durably). A disconnected client can reconnect later via
    /// `subscribe` and be reactivated.
    pub async fn unsubscribe(&self, topic: Topic, subscriber_id: &str) -> Result<()> {
        let found = {
            let state = self.state.read().await;
            state
                .topics
                .get(&topic)
                .and_then(|subscribers| subscribers.get(subscriber_id))
                .cloned()
        };
        if let Some(subscriber) = found {
            subscriber.stop().await;
            subscriber.set_offline().await;
            debug!(topic, subscriber_id, "unsubscribed");
        }
        Ok(())
    }

    /// Snapshot of every subscriber currently watching `topic`.
    pub async fn get_subscribers(&self, topic: Topic) -> Vec<Arc<Subscriber>> {
        self.state
            .read()
            .await
            .topics
            .get(&topic)
            .map(|subscribers| subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Publish a change to every subscriber of `topics`, except the
    /// subscriber identified by `originator` (the client that caused the
    /// change, which does not need to be told about its own write).
    pub async fn publish_change(&self, topics: &[Topic], originator: &str, event: Event) {
        self.metrics.inc_event_published(event.kind.as_str());
        for topic in topics {
            let targets = self.snapshot_targets(*topic, originator).await;
            for subscriber in targets {
                subscriber.publish(event.clone()).await;
            }
        }
    }

    /// Publish a move: when `from_topics` and `to_topics` are identical
    /// (a rename within the same folder set), subscribers see a single
    /// `Rename` event; otherwise subscribers of the vacated topics see a
    /// `Delete` and subscribers of the new topics see a `Create`.
    pub async fn publish_move(
        &self,
        from_topics: &[Topic],
        to_topics: &[Topic],
        originator: &str,
        file_id: &str,
        from: &str,
        to: &str,
    ) {
        if from_topics == to_topics {
            self.publish_change(from_topics, originator, Event::rename(file_id, from, to))
                .await;
            return;
        }
        self.publish_change(from_topics, originator, Event::new(EventType::Delete, file_id, from))
            .await;
        self.publish_change(to_topics, originator, Event::new(EventType::Create, file_id, to))
            .await;
    }

    fn active_count(&self, state: &HubState) -> i64 {
        state
            .topics
            .values()
            .map(|subscribers| i64::try_from(subscribers.len()).unwrap_or(i64::MAX))
            .sum()
    }

    async fn snapshot_targets(&self, topic: Topic, originator: &str) -> Vec<Arc<Subscriber>> {
        self.state
            .read()
            .await
            .topics
            .get(&topic)
            .map(|subscribers| {
                subscribers
                    .values()
                    .filter(|subscriber| subscriber.id() != originator)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn sweep(&self) {
        let now = chrono::Utc::now();
        let mut expired: Vec<(Topic, Arc<Subscriber>)> = Vec::new();
        {
            let state = self.state.read().await;
            for (topic, subscribers) in &state.topics {
                for subscriber in subscribers.values() {
                    let Some(offline_since) = subscriber.offline_since().await else {
                        continue;
                    };
                    let elapsed = now.signed_duration_since(offline_since);
                    if elapsed.to_std().unwrap_or(Duration::ZERO) >= self.expiry {
                        expired.push((*topic, Arc::clone(subscriber)));
                    }
                }
            }
        }

        for (topic, subscriber) in &expired {
            subscriber.close().await;
            self.metrics.inc_subscriber_expired();
            info!(topic, subscriber_id = subscriber.id(), "expired offline subscriber");
        }

        if expired.is_empty() {
            return;
        }
        let mut state = self.state.write().await;
        for (topic, subscriber) in &expired {
            if let Some(subscribers) = state.topics.get_mut(topic) {
                subscribers.remove(subscriber.id());
                if subscribers.is_empty() {
                    state.topics.remove(topic);
                }
            }
        }
        self.metrics.set_subscribers_active(self.active_count(&state));
    }

    /// Signal shutdown, close every subscriber in every topic, then wait
    /// for the sweeper to observe the signal and exit. Further calls to
    /// `subscribe` fail with [`EventsError::ClosedHub`].
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_waiters();

        let subscribers: Vec<Arc<Subscriber>> = {
            let mut state = self.state.write().await;
            state
                .topics
                .drain()
                .flat_map(|(_, subscribers)| subscribers.into_values())
                .collect()
        };
        for subscriber in subscribers {
            subscriber.close().await;
        }
        self.metrics.set_subscribers_active(0);

        let handle = self.sweeper.lock().expect("sweeper mutex is never poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
