//! Per-sink egress queues and the worker pool that drains them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use telemetry_types::EventGroup;
use tracing::{debug, error, info, warn};

use super::key::QueueKeyManager;
use super::{PushResult, QueueKey};
use crate::error::{PipelineError, PipelineResult};
use crate::monitor::{Alarm, AlarmKind, AlarmSender, Counter};

const DEFAULT_SINK_QUEUE_CAPACITY: usize = 100;
const DEFAULT_MAX_IN_FLIGHT: usize = 1;
const MAX_DELIVERY_ATTEMPTS: u32 = 3;
const WORKER_IDLE_WAIT: Duration = Duration::from_millis(10);

/// A unit of work handed to a sink's transport.
#[derive(Debug)]
pub struct SinkRequest {
    pub pipeline: String,
    pub groups: Vec<EventGroup>,
    attempts: u32,
}

impl SinkRequest {
    pub fn new(pipeline: impl Into<String>, groups: Vec<EventGroup>) -> Self {
        Self {
            pipeline: pipeline.into(),
            groups,
            attempts: 0,
        }
    }

    pub fn event_count(&self) -> usize {
        self.groups.iter().map(EventGroup::event_count).sum()
    }

    pub fn into_groups(self) -> Vec<EventGroup> {
        self.groups
    }
}

/// The wire side of a sink. Implementations own the actual protocol; the
/// queue layer only cares whether a request went out.
pub trait SinkTransport: Send + Sync {
    fn deliver(&self, request: &SinkRequest) -> bool;
}

/// Capacity and concurrency shape of one sink queue.
#[derive(Debug, Clone, Copy)]
pub struct SinkQueueParams {
    pub capacity: usize,
    pub max_in_flight: usize,
}

impl Default for SinkQueueParams {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SINK_QUEUE_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

struct SinkQueueState {
    items: VecDeque<SinkRequest>,
    in_flight: usize,
}

/// A bounded egress queue owned by exactly one sink instance.
pub struct SinkQueue {
    key: QueueKey,
    params: SinkQueueParams,
    state: Mutex<SinkQueueState>,
    transport: Arc<dyn SinkTransport>,
    send_failures: Counter,
}

impl SinkQueue {
    fn new(key: QueueKey, params: SinkQueueParams, transport: Arc<dyn SinkTransport>) -> Self {
        Self {
            key,
            params,
            state: Mutex::new(SinkQueueState {
                items: VecDeque::new(),
                in_flight: 0,
            }),
            transport,
            send_failures: Counter::new(),
        }
    }

    pub fn key(&self) -> QueueKey {
        self.key
    }

    /// Whether the queue can take another request. Process queues gate their
    /// pops on this signal.
    pub fn has_room(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.items.len() + state.in_flight < self.params.capacity
    }

    pub fn depth(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.value()
    }

    /// Enqueues a request, handing it back when there is no room.
    pub(crate) fn push(&self, request: SinkRequest) -> Result<(), SinkRequest> {
        let mut state = self.state.lock().unwrap();
        if state.items.len() + state.in_flight >= self.params.capacity {
            return Err(request);
        }
        state.items.push_back(request);
        Ok(())
    }

    /// Claims the next request if the queue's concurrency limit allows it.
    fn claim(&self) -> Option<SinkRequest> {
        let mut state = self.state.lock().unwrap();
        if state.in_flight >= self.params.max_in_flight {
            return None;
        }
        let request = state.items.pop_front()?;
        state.in_flight += 1;
        Some(request)
    }

    fn finish(&self, retry: Option<SinkRequest>) {
        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        if let Some(request) = retry {
            state.items.push_front(request);
        }
    }

    /// Synchronously drains the queue, delivering every request inline.
    /// Returns false if any delivery failed. Used on shutdown.
    fn drain(&self) -> bool {
        let mut all_ok = true;
        loop {
            let request = {
                let mut state = self.state.lock().unwrap();
                match state.items.pop_front() {
                    Some(r) => r,
                    None => break,
                }
            };
            if !self.transport.deliver(&request) {
                self.send_failures.inc();
                all_ok = false;
            }
        }
        all_ok
    }
}

/// Owns every sink queue in the process plus the worker pool that drains
/// them. All operations are safe for concurrent use.
pub struct SinkQueueManager {
    queues: Mutex<HashMap<QueueKey, Arc<SinkQueue>>>,
    cond: Condvar,
    key_manager: Arc<QueueKeyManager>,
    alarm: AlarmSender,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    rr_cursor: AtomicUsize,
}

impl SinkQueueManager {
    pub fn new(key_manager: Arc<QueueKeyManager>, alarm: AlarmSender) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            cond: Condvar::new(),
            key_manager,
            alarm,
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            rr_cursor: AtomicUsize::new(0),
        }
    }

    /// Creates the queue for `key`. Exactly one queue may exist per key;
    /// a second creation is a configuration error.
    pub fn create_queue(
        &self,
        key: QueueKey,
        params: SinkQueueParams,
        transport: Arc<dyn SinkTransport>,
    ) -> PipelineResult<Arc<SinkQueue>> {
        let mut queues = self.queues.lock().unwrap();
        if queues.contains_key(&key) {
            return Err(PipelineError::SinkQueueExists(key));
        }
        let queue = Arc::new(SinkQueue::new(key, params, transport));
        queues.insert(key, queue.clone());
        self.key_manager.retain(key);
        Ok(queue)
    }

    pub fn get_queue(&self, key: QueueKey) -> Option<Arc<SinkQueue>> {
        self.queues.lock().unwrap().get(&key).cloned()
    }

    pub fn push(&self, key: QueueKey, request: SinkRequest) -> PipelineResult<PushResult> {
        Ok(match self.try_push(key, request)? {
            Ok(()) => PushResult::Pushed,
            Err(_rejected) => PushResult::Backpressured,
        })
    }

    /// Like [`push`](Self::push), but hands the request back to the caller
    /// when the queue has no room, so buffered data is never dropped.
    pub fn try_push(
        &self,
        key: QueueKey,
        request: SinkRequest,
    ) -> PipelineResult<Result<(), SinkRequest>> {
        let queue = self
            .get_queue(key)
            .ok_or(PipelineError::QueueNotFound(key))?;
        match queue.push(request) {
            Ok(()) => {
                self.cond.notify_one();
                Ok(Ok(()))
            }
            Err(rejected) => Ok(Err(rejected)),
        }
    }

    /// Whether the queue for `key` can accept another request.
    pub fn available(&self, key: QueueKey) -> bool {
        self.get_queue(key).map_or(false, |q| q.has_room())
    }

    /// Force-drains one queue inline, bypassing the worker pool.
    pub fn flush_queue(&self, key: QueueKey) -> bool {
        self.get_queue(key).map_or(true, |q| q.drain())
    }

    /// Force-drains every queue. Used on shutdown.
    pub fn flush_all(&self) -> bool {
        let queues: Vec<_> = self.queues.lock().unwrap().values().cloned().collect();
        let mut all_ok = true;
        for queue in queues {
            all_ok &= queue.drain();
        }
        all_ok
    }

    /// Removes the queue after draining it and releases its key.
    pub fn delete_queue(&self, key: QueueKey) -> bool {
        let queue = match self.queues.lock().unwrap().remove(&key) {
            Some(q) => q,
            None => return false,
        };
        queue.drain();
        self.key_manager.release(key);
        true
    }

    /// Spawns `count` worker threads that invoke sink transports.
    pub fn start_workers(self: &Arc<Self>, count: usize) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().unwrap();
        for i in 0..count {
            let manager = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(format!("sink-worker-{i}"))
                .spawn(move || manager.worker_loop())
                .expect("failed to spawn sink worker");
            workers.push(handle);
        }
        info!("started {} sink workers", count);
    }

    pub fn stop_workers(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cond.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            if handle.join().is_err() {
                error!("sink worker panicked during shutdown");
            }
        }
    }

    fn worker_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            match self.claim_next() {
                Some((queue, request)) => self.deliver(&queue, request),
                None => {
                    let guard = self.queues.lock().unwrap();
                    let _unused = self
                        .cond
                        .wait_timeout(guard, WORKER_IDLE_WAIT)
                        .unwrap();
                }
            }
        }
        debug!("sink worker exiting");
    }

    /// Picks the next deliverable request, round-robin across queues so one
    /// busy sink cannot monopolize the pool.
    fn claim_next(&self) -> Option<(Arc<SinkQueue>, SinkRequest)> {
        let queues: Vec<_> = self.queues.lock().unwrap().values().cloned().collect();
        if queues.is_empty() {
            return None;
        }
        let start = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % queues.len();
        for i in 0..queues.len() {
            let queue = &queues[(start + i) % queues.len()];
            if let Some(request) = queue.claim() {
                return Some((queue.clone(), request));
            }
        }
        None
    }

    fn deliver(&self, queue: &Arc<SinkQueue>, mut request: SinkRequest) {
        if queue.transport.deliver(&request) {
            queue.finish(None);
            return;
        }
        request.attempts += 1;
        queue.send_failures.inc();
        if request.attempts < MAX_DELIVERY_ATTEMPTS {
            warn!(
                "delivery failed for pipeline '{}', retrying (attempt {})",
                request.pipeline, request.attempts
            );
            queue.finish(Some(request));
        } else {
            error!(
                "delivery failed {} times for pipeline '{}', dropping {} events",
                MAX_DELIVERY_ATTEMPTS,
                request.pipeline,
                request.event_count()
            );
            self.alarm.send_rate_limited(Alarm {
                kind: AlarmKind::SendFailure,
                message: format!(
                    "dropped {} events after {} delivery attempts, pipeline: {}",
                    request.event_count(),
                    MAX_DELIVERY_ATTEMPTS,
                    request.pipeline
                ),
                project: String::new(),
                logstore: String::new(),
                region: String::new(),
            });
            queue.finish(None);
        }
    }
}
