//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes a minimal set of counters/gauges relevant to the event pipeline
//!   and the cryptor, rather than one gauge per subsystem in the platform.

use std::convert::TryFrom;
use std::time::Duration;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across the event pipeline.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    events_published_total: IntCounterVec,
    events_delivered_total: IntCounter,
    events_dropped_total: IntCounter,
    flushes_persisted_total: IntCounter,
    durable_store_errors_total: IntCounter,
    subscribers_active: IntGauge,
    subscribers_expired_total: IntCounter,
    cryptor_seek_latency_ms: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Number of currently registered (non-closed) subscribers.
    pub subscribers_active: i64,
    /// Total subscribers removed by the sweeper for exceeding the offline bound.
    pub subscribers_expired_total: u64,
    /// Total events delivered on a live channel.
    pub events_delivered_total: u64,
    /// Total events dropped because a subscriber's channel was full.
    pub events_dropped_total: u64,
    /// Total buffer flushes persisted to the durable store.
    pub flushes_persisted_total: u64,
    /// Total durable-store errors observed during flush.
    pub durable_store_errors_total: u64,
    /// Latency (ms) of the most recent cryptor seek.
    pub cryptor_seek_latency_ms: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "events_published_total",
                "Filesystem change events published to the hub, by event type",
            ),
            &["type"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "events_published_total",
            source,
        })?;
        let events_delivered_total = IntCounter::with_opts(Opts::new(
            "events_delivered_total",
            "Events delivered on a live subscriber channel",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "events_delivered_total",
            source,
        })?;
        let events_dropped_total = IntCounter::with_opts(Opts::new(
            "events_dropped_total",
            "Events dropped because a subscriber channel was full",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "events_dropped_total",
            source,
        })?;
        let flushes_persisted_total = IntCounter::with_opts(Opts::new(
            "flushes_persisted_total",
            "Debounce flushes persisted to the durable event store",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "flushes_persisted_total",
            source,
        })?;
        let durable_store_errors_total = IntCounter::with_opts(Opts::new(
            "durable_store_errors_total",
            "Durable store errors observed while flushing an offline subscriber",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "durable_store_errors_total",
            source,
        })?;
        let subscribers_active = IntGauge::with_opts(Opts::new(
            "subscribers_active",
            "Subscribers currently registered across all topics",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "subscribers_active",
            source,
        })?;
        let subscribers_expired_total = IntCounter::with_opts(Opts::new(
            "subscribers_expired_total",
            "Subscribers removed by the sweeper for exceeding the offline bound",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "subscribers_expired_total",
            source,
        })?;
        let cryptor_seek_latency_ms = IntGauge::with_opts(Opts::new(
            "cryptor_seek_latency_ms",
            "Latency of the most recent cryptor seek, in milliseconds",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "cryptor_seek_latency_ms",
            source,
        })?;

        for collector in [
            Box::new(events_published_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(events_delivered_total.clone()),
            Box::new(events_dropped_total.clone()),
            Box::new(flushes_persisted_total.clone()),
            Box::new(durable_store_errors_total.clone()),
            Box::new(subscribers_active.clone()),
            Box::new(subscribers_expired_total.clone()),
            Box::new(cryptor_seek_latency_ms.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|source| TelemetryError::MetricsCollector {
                    name: "event_pipeline_registry",
                    source,
                })?;
        }

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                events_published_total,
                events_delivered_total,
                events_dropped_total,
                flushes_persisted_total,
                durable_store_errors_total,
                subscribers_active,
                subscribers_expired_total,
                cryptor_seek_latency_ms,
            }),
        })
    }

    /// Increment the published-event counter for the given event type.
    pub fn inc_event_published(&self, event_type: &str) {
        self.inner
            .events_published_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Increment the live-delivery counter.
    pub fn inc_event_delivered(&self) {
        self.inner.events_delivered_total.inc();
    }

    /// Increment the channel-full drop counter.
    pub fn inc_event_dropped(&self) {
        self.inner.events_dropped_total.inc();
    }

    /// Increment the durable-flush counter.
    pub fn inc_flush_persisted(&self) {
        self.inner.flushes_persisted_total.inc();
    }

    /// Increment the durable-store-error counter.
    pub fn inc_durable_store_error(&self) {
        self.inner.durable_store_errors_total.inc();
    }

    /// Set the active-subscriber gauge.
    pub fn set_subscribers_active(&self, count: i64) {
        self.inner.subscribers_active.set(count);
    }

    /// Increment the subscriber-expiry counter.
    pub fn inc_subscriber_expired(&self) {
        self.inner.subscribers_expired_total.inc();
    }

    /// Record the observed latency of a cryptor seek.
    pub fn observe_cryptor_seek_latency(&self, duration: Duration) {
        self.inner
            .cryptor_seek_latency_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            subscribers_active: self.inner.subscribers_active.get(),
            subscribers_expired_total: self.inner.subscribers_expired_total.get(),
            events_delivered_total: self.inner.events_delivered_total.get(),
            events_dropped_total: self.inner.events_dropped_total.get(),
            flushes_persisted_total: self.inner.flushes_persisted_total.get(),
            durable_store_errors_total: self.inner.durable_store_errors_total.get(),
            cryptor_seek_latency_ms: self.inner.cryptor_seek_latency_ms.get(),
        }
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn duration_to_ms_saturates_on_large_values() {
        let duration = Duration::from_secs(u64::MAX / 2);
        assert_eq!(Metrics::duration_to_ms(duration), i64::MAX);
    }

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_event_published("create");
        metrics.inc_event_delivered();
        metrics.inc_event_dropped();
        metrics.inc_flush_persisted();
        metrics.inc_durable_store_error();
        metrics.set_subscribers_active(3);
        metrics.inc_subscriber_expired();
        metrics.observe_cryptor_seek_latency(Duration::from_millis(7));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.subscribers_active, 3);
        assert_eq!(snapshot.subscribers_expired_total, 1);
        assert_eq!(snapshot.events_delivered_total, 1);
        assert_eq!(snapshot.events_dropped_total, 1);
        assert_eq!(snapshot.flushes_persisted_total, 1);
        assert_eq!(snapshot.durable_store_errors_total, 1);
        assert_eq!(snapshot.cryptor_seek_latency_ms, 7);

        let rendered = metrics.render()?;
        assert!(rendered.contains("events_published_total"));
        assert!(rendered.contains("subscribers_expired_total"));
        Ok(())
    }
}
