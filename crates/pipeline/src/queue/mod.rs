//! Bounded and circular queues decoupling inputs, processing, and sinks.

pub mod key;
pub mod process;
pub mod sink;

pub use key::QueueKeyManager;
pub use process::{ProcessQueueItem, ProcessQueueManager, MAX_PRIORITY};
pub use sink::{SinkQueue, SinkQueueManager, SinkQueueParams, SinkRequest, SinkTransport};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Stable identifier for a queue, minted by the [`QueueKeyManager`]. Lets
/// plugins address a queue without holding a pointer to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueKey(pub u64);

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of pushing into a process queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    /// Accepted.
    Pushed,
    /// Bounded queue at its high watermark; the producer must back off.
    Backpressured,
    /// Circular queue was full; the oldest entry was evicted to make room.
    Evicted,
}

/// Callback fired when a bounded process queue drains below its low
/// watermark, letting throttled inputs resume.
pub trait Feedback: Send + Sync {
    fn feedback(&self, key: QueueKey);
}

/// Maps input plugin type names to their feedback interfaces.
///
/// Inputs that throttle on backpressure register here once at plugin
/// registration time; pipelines wire the interfaces of their input kinds into
/// the process queue at init.
#[derive(Default)]
pub struct FeedbackRegistry {
    inner: Mutex<HashMap<String, Arc<dyn Feedback>>>,
}

impl FeedbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, input_type: &str, feedback: Arc<dyn Feedback>) {
        self.inner
            .lock()
            .unwrap()
            .insert(input_type.to_string(), feedback);
    }

    pub fn get(&self, input_type: &str) -> Option<Arc<dyn Feedback>> {
        self.inner.lock().unwrap().get(input_type).cloned()
    }
}
