//! Timeout-driven batch flushing.
//!
//! Sinks that hold a partial batch register a deadline here; a single timer
//! thread fires the callbacks of due records and removes them. Clearing a
//! pipeline's records on Stop/FlushBatch guarantees a stopped pipeline never
//! receives a late flush.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::monitor::Counter;

const TIMER_TICK: Duration = Duration::from_millis(100);

/// Fired when a record's deadline passes. Callbacks only move batched data
/// into sink queues; the actual delivery still happens on sink workers.
pub type FlushCallback = Arc<dyn Fn() + Send + Sync>;

struct FlushRecord {
    deadline: Instant,
    callback: FlushCallback,
}

/// Process-wide scheduler of per-sink flush deadlines, keyed by pipeline
/// name. All operations are safe for concurrent use.
pub struct TimeoutFlushManager {
    records: Mutex<HashMap<String, HashMap<u64, FlushRecord>>>,
    running: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    clears: Counter,
}

impl Default for TimeoutFlushManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeoutFlushManager {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            timer: Mutex::new(None),
            clears: Counter::new(),
        }
    }

    /// Registers or re-arms the record `(pipeline, flush_key)` to fire
    /// `timeout` from now.
    pub fn update_record(
        &self,
        pipeline: &str,
        flush_key: u64,
        timeout: Duration,
        callback: FlushCallback,
    ) {
        let mut records = self.records.lock().unwrap();
        records.entry(pipeline.to_string()).or_default().insert(
            flush_key,
            FlushRecord {
                deadline: Instant::now() + timeout,
                callback,
            },
        );
    }

    /// Removes every outstanding record for a pipeline. Returns how many
    /// records were dropped.
    pub fn clear_records(&self, pipeline: &str) -> usize {
        self.clears.inc();
        let mut records = self.records.lock().unwrap();
        records.remove(pipeline).map(|m| m.len()).unwrap_or(0)
    }

    pub fn pending(&self, pipeline: &str) -> usize {
        let records = self.records.lock().unwrap();
        records.get(pipeline).map(HashMap::len).unwrap_or(0)
    }

    /// Number of `clear_records` invocations so far.
    pub fn clear_invocations(&self) -> u64 {
        self.clears.value()
    }

    /// Fires every due record and removes it. Called by the timer thread;
    /// exposed so tests can drive time explicitly.
    pub fn fire_due(&self) -> usize {
        let now = Instant::now();
        let due: Vec<FlushCallback> = {
            let mut records = self.records.lock().unwrap();
            let mut due = Vec::new();
            for per_pipeline in records.values_mut() {
                per_pipeline.retain(|_, record| {
                    if record.deadline <= now {
                        due.push(record.callback.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            records.retain(|_, per_pipeline| !per_pipeline.is_empty());
            due
        };
        // Callbacks run outside the lock: they may re-register records.
        let fired = due.len();
        for callback in due {
            callback();
        }
        if fired > 0 {
            debug!("fired {} timeout flush records", fired);
        }
        fired
    }

    /// Starts the timer thread.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("timeout-flush".to_string())
            .spawn(move || {
                while manager.running.load(Ordering::SeqCst) {
                    manager.fire_due();
                    thread::sleep(TIMER_TICK);
                }
                debug!("timeout flush timer exiting");
            })
            .unwrap();
        *self.timer.lock().unwrap() = Some(handle);
        info!("timeout flush manager started");
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.timer.lock().unwrap().take() {
            let _unused = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_records_fire_once() {
        let manager = TimeoutFlushManager::new();
        let fired = Counter::new();
        let counter = fired.clone();
        manager.update_record(
            "p",
            1,
            Duration::ZERO,
            Arc::new(move || counter.inc()),
        );

        assert_eq!(manager.fire_due(), 1);
        assert_eq!(fired.value(), 1);
        // Fired records are removed.
        assert_eq!(manager.fire_due(), 0);
        assert_eq!(manager.pending("p"), 0);
    }

    #[test]
    fn test_update_record_rearms_deadline() {
        let manager = TimeoutFlushManager::new();
        let fired = Counter::new();
        let counter = fired.clone();
        let callback: FlushCallback = Arc::new(move || counter.inc());
        manager.update_record("p", 7, Duration::from_secs(60), callback.clone());
        manager.update_record("p", 7, Duration::ZERO, callback);

        assert_eq!(manager.pending("p"), 1);
        assert_eq!(manager.fire_due(), 1);
        assert_eq!(fired.value(), 1);
    }

    #[test]
    fn test_clear_records_prevents_late_flush() {
        let manager = TimeoutFlushManager::new();
        let fired = Counter::new();
        let counter = fired.clone();
        manager.update_record("p", 1, Duration::ZERO, Arc::new(move || counter.inc()));
        manager.update_record("other", 1, Duration::from_secs(60), Arc::new(|| {}));

        assert_eq!(manager.clear_records("p"), 1);
        assert_eq!(manager.fire_due(), 0);
        assert_eq!(fired.value(), 0);
        assert_eq!(manager.pending("other"), 1);
        assert_eq!(manager.clear_invocations(), 1);
    }
}
