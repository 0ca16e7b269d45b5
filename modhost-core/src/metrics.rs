use chrono::{DateTime, Utc};
use opentelemetry::{
    global,
    metrics::{Counter, UpDownCounter},
    KeyValue,
};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    RwLock,
};

/// OpenTelemetry instruments for the message bus.
///
/// Exported only when the host installs a meter provider; otherwise the
/// global no-op provider swallows every record.
#[derive(Debug)]
struct BusInstruments {
    published: Counter<u64>,
    delivered: Counter<u64>,
    receive_errors: Counter<u64>,
    dropped: Counter<u64>,
    subscribers: UpDownCounter<i64>,
}

impl BusInstruments {
    fn new() -> Self {
        let meter = global::meter("message_bus");
        Self {
            published: meter
                .u64_counter("message_bus.published")
                .with_description("Number of messages accepted by the bus")
                .build(),
            delivered: meter
                .u64_counter("message_bus.delivered")
                .with_description("Number of messages handled by a receiver")
                .build(),
            receive_errors: meter
                .u64_counter("message_bus.receive_errors")
                .with_description("Number of receive calls that failed or panicked")
                .build(),
            dropped: meter
                .u64_counter("message_bus.dropped")
                .with_description("Number of queued messages discarded on unsubscribe")
                .build(),
            subscribers: meter
                .i64_up_down_counter("message_bus.subscribers")
                .with_description("Number of live subscriptions")
                .build(),
        }
    }
}

/// Bus-wide counters with atomic mirrors for in-process inspection.
#[derive(Debug)]
pub struct BusMetrics {
    published: AtomicU64,
    fanout: AtomicU64,
    delivered: AtomicU64,
    receive_errors: AtomicU64,
    dropped: AtomicU64,
    instruments: BusInstruments,
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self {
            published: AtomicU64::new(0),
            fanout: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            instruments: BusInstruments::new(),
        }
    }
}

impl BusMetrics {
    #[inline]
    pub(crate) fn record_published(&self, receivers: usize) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.fanout.fetch_add(receivers as u64, Ordering::Relaxed);
        self.instruments.published.add(1, &[]);
    }

    #[inline]
    pub(crate) fn record_delivered(&self, module: &str) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.instruments
            .delivered
            .add(1, &[KeyValue::new("module", module.to_string())]);
    }

    #[inline]
    pub(crate) fn record_receive_error(&self, module: &str) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
        self.instruments
            .receive_errors
            .add(1, &[KeyValue::new("module", module.to_string())]);
    }

    #[inline]
    pub(crate) fn record_dropped(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.dropped.fetch_add(count, Ordering::Relaxed);
        self.instruments.dropped.add(count, &[]);
    }

    #[inline]
    pub(crate) fn subscriber_added(&self) {
        self.instruments.subscribers.add(1, &[]);
    }

    #[inline]
    pub(crate) fn subscriber_removed(&self) {
        self.instruments.subscribers.add(-1, &[]);
    }

    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            fanout: self.fanout.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of bus metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMetricsSnapshot {
    /// Messages accepted by `publish`
    pub published: u64,
    /// Sum of receivers over all published messages
    pub fanout: u64,
    pub delivered: u64,
    pub receive_errors: u64,
    /// Queued messages discarded because their receiver unsubscribed
    pub dropped: u64,
}

/// Per-module delivery metrics, updated by the module's delivery worker.
#[derive(Debug)]
pub struct ModuleMetrics {
    /// Messages handled successfully
    pub received: AtomicU64,

    /// Receive calls that returned an error or panicked
    pub failed: AtomicU64,

    /// Last successful receive
    pub last_received: RwLock<Option<DateTime<Utc>>>,

    /// Last failure with its description
    pub last_error: RwLock<Option<(DateTime<Utc>, String)>>,

    /// Average handling latency in nanoseconds (stored as u64 for atomic access)
    pub avg_latency_ns: AtomicU64,
}

impl Default for ModuleMetrics {
    fn default() -> Self {
        Self {
            received: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_received: RwLock::new(None),
            last_error: RwLock::new(None),
            avg_latency_ns: AtomicU64::new(0),
        }
    }
}

impl ModuleMetrics {
    #[inline]
    pub fn record_received(&self, latency_ns: u64) {
        self.received.fetch_add(1, Ordering::Relaxed);
        *self.last_received.write().unwrap() = Some(Utc::now());
        self.update_latency(latency_ns);
    }

    #[inline]
    pub fn record_failure(&self, reason: String) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write().unwrap() = Some((Utc::now(), reason));
    }

    /// Update average latency using exponential moving average
    ///
    /// Uses a simple EMA: new_avg = 0.9 * old_avg + 0.1 * sample
    #[inline]
    fn update_latency(&self, sample_ns: u64) {
        let old = self.avg_latency_ns.load(Ordering::Relaxed);
        let new = if old == 0 {
            sample_ns
        } else {
            (old * 9 + sample_ns) / 10
        };
        self.avg_latency_ns.store(new, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ModuleMetricsSnapshot {
        let last_error = self.last_error.read().unwrap().clone();
        ModuleMetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_received: *self.last_received.read().unwrap(),
            last_error_at: last_error.as_ref().map(|(at, _)| *at),
            last_error: last_error.map(|(_, reason)| reason),
            avg_latency_ms: self.avg_latency_ns.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Serializable snapshot of module metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMetricsSnapshot {
    pub received: u64,
    pub failed: u64,
    pub last_received: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub avg_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_ema() {
        let m = ModuleMetrics::default();
        m.record_received(1_000_000);
        assert_eq!(m.avg_latency_ns.load(Ordering::Relaxed), 1_000_000);
        m.record_received(2_000_000);
        assert_eq!(m.avg_latency_ns.load(Ordering::Relaxed), 1_100_000);

        let snap = m.snapshot();
        assert_eq!(snap.received, 2);
        assert!(snap.last_received.is_some());
        assert!((snap.avg_latency_ms - 1.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failure_keeps_reason() {
        let m = ModuleMetrics::default();
        m.record_failure("bad payload".into());
        let snap = m.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.last_error.as_deref(), Some("bad payload"));
        assert!(snap.last_error_at.is_some());
    }

    #[test]
    fn test_bus_snapshot_counts() {
        let m = BusMetrics::default();
        m.record_published(2);
        m.record_published(0);
        m.record_delivered("sink");
        m.record_receive_error("sink");
        m.record_dropped(3);
        m.record_dropped(0);

        let snap = m.snapshot();
        assert_eq!(snap.published, 2);
        assert_eq!(snap.fanout, 2);
        assert_eq!(snap.delivered, 1);
        assert_eq!(snap.receive_errors, 1);
        assert_eq!(snap.dropped, 3);
    }
}
