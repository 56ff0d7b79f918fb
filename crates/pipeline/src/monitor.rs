//! Counters, per-plugin metric records, and alarms.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

/// Metric names shared by processor and sink instances.
pub const METRIC_IN_RECORDS_TOTAL: &str = "in_records_total";
pub const METRIC_OUT_RECORDS_TOTAL: &str = "out_records_total";
pub const METRIC_IN_SIZE_BYTES: &str = "in_size_bytes";
pub const METRIC_OUT_SIZE_BYTES: &str = "out_size_bytes";
pub const METRIC_DISCARD_RECORDS_TOTAL: &str = "discard_records_total";
pub const METRIC_PARSE_ERROR_TOTAL: &str = "parse_error_total";

/// A shared monotonically increasing counter.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A bag of named counters owned by one plugin instance.
///
/// Plugins create the counters they need during init; the owning instance
/// keeps the record so the runtime can snapshot it.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecord {
    counters: Arc<Mutex<HashMap<&'static str, Counter>>>,
}

impl MetricsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter registered under `name`, creating it on first use.
    pub fn counter(&self, name: &'static str) -> Counter {
        let mut counters = self.counters.lock().unwrap();
        counters.entry(name).or_default().clone()
    }

    /// Current value of a counter, zero if it was never created.
    pub fn value(&self, name: &'static str) -> u64 {
        let counters = self.counters.lock().unwrap();
        counters.get(name).map(Counter::value).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let counters = self.counters.lock().unwrap();
        let mut out: Vec<_> = counters.iter().map(|(k, v)| (*k, v.value())).collect();
        out.sort_by_key(|(k, _)| *k);
        out
    }
}

/// Alarm categories emitted by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmKind {
    ConfigError,
    ParseFailure,
    SendFailure,
}

/// A categorized alarm with the owning pipeline's identity tags attached.
#[derive(Debug, Clone)]
pub struct Alarm {
    pub kind: AlarmKind,
    pub message: String,
    pub project: String,
    pub logstore: String,
    pub region: String,
}

/// Minimum spacing between alarms of the same kind when rate limiting.
const ALARM_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Sending half of the alarm channel. The receiving half is drained by an
/// external alarm transport.
#[derive(Clone)]
pub struct AlarmSender {
    tx: flume::Sender<Alarm>,
    recent: Arc<Mutex<HashMap<AlarmKind, Instant>>>,
}

impl AlarmSender {
    pub fn channel() -> (AlarmSender, flume::Receiver<Alarm>) {
        let (tx, rx) = flume::unbounded();
        (
            AlarmSender {
                tx,
                recent: Arc::new(Mutex::new(HashMap::new())),
            },
            rx,
        )
    }

    pub fn send(&self, alarm: Alarm) {
        if self.tx.send(alarm).is_err() {
            debug!("alarm receiver dropped, alarm discarded");
        }
    }

    /// Sends unless an alarm of the same kind went out within the last
    /// [`ALARM_MIN_INTERVAL`]. Used on per-record failure paths where a bad
    /// batch would otherwise emit thousands of identical alarms.
    pub fn send_rate_limited(&self, alarm: Alarm) {
        let now = Instant::now();
        {
            let mut recent = self.recent.lock().unwrap();
            match recent.get(&alarm.kind) {
                Some(last) if now.duration_since(*last) < ALARM_MIN_INTERVAL => return,
                _ => {
                    recent.insert(alarm.kind, now);
                }
            }
        }
        self.send(alarm);
    }
}
