//! Per-pipeline ingress queues with priority-fair scheduling.
//!
//! Each live pipeline owns exactly one process queue, bounded when its inputs
//! can honor acknowledgements and circular otherwise. Consumers pop across
//! all queues through the manager: higher-priority queues are served first,
//! with a starvation guard that periodically yields a pop to lower
//! priorities. A queue whose downstream sink queues are full is ineligible
//! for popping, which is the only coupling between ingress and egress rates.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use telemetry_types::EventGroup;
use tracing::{debug, info, warn};

use super::key::QueueKeyManager;
use super::sink::SinkQueue;
use super::{Feedback, PushResult, QueueKey};
use crate::error::{PipelineError, PipelineResult};
use crate::monitor::Counter;

/// Lowest priority level; 0 is the highest.
pub const MAX_PRIORITY: u32 = 3;

const DEFAULT_BOUNDED_CAPACITY: usize = 20;
/// Consecutive pops served to one priority level before yielding a pop to a
/// lower level, so sustained high-priority traffic cannot starve the rest.
const MAX_CONSECUTIVE_POPS: u32 = 8;
const POP_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// One entry in a process queue: the group plus the index of the input that
/// produced it, so processing can run that input's inner processors.
#[derive(Debug)]
pub struct ProcessQueueItem {
    pub group: EventGroup,
    pub input_index: usize,
}

impl ProcessQueueItem {
    pub fn new(group: EventGroup, input_index: usize) -> Self {
        Self { group, input_index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Discipline {
    Bounded,
    Circular,
}

struct ProcessQueue {
    priority: u32,
    discipline: Discipline,
    capacity: usize,
    /// Bounded only: no pushes accepted once the high watermark is reached,
    /// until the queue drains back to the low watermark.
    push_blocked: bool,
    /// Pop gate; enabled while the owning pipeline is started.
    pop_enabled: bool,
    /// Delete requested while items remained; removed once drained.
    draining: bool,
    items: VecDeque<ProcessQueueItem>,
    feedbacks: Vec<Arc<dyn Feedback>>,
    downstream: Vec<Arc<SinkQueue>>,
}

impl ProcessQueue {
    fn new(priority: u32, discipline: Discipline, capacity: usize) -> Self {
        Self {
            priority,
            discipline,
            capacity,
            push_blocked: false,
            pop_enabled: false,
            draining: false,
            items: VecDeque::new(),
            feedbacks: Vec::new(),
            downstream: Vec::new(),
        }
    }

    fn low_watermark(&self) -> usize {
        (self.capacity / 2).max(1)
    }

    fn eligible_for_pop(&self) -> bool {
        (self.pop_enabled || self.draining)
            && !self.items.is_empty()
            && self.downstream.iter().all(|q| q.has_room())
    }
}

#[derive(Default)]
struct Inner {
    queues: HashMap<QueueKey, ProcessQueue>,
    /// Queue keys grouped by priority level, with a rotating cursor per level
    /// for round-robin among queues of equal priority.
    by_priority: Vec<Vec<QueueKey>>,
    cursors: Vec<usize>,
    last_priority: Option<u32>,
    run_length: u32,
}

impl Inner {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            by_priority: vec![Vec::new(); (MAX_PRIORITY + 1) as usize],
            cursors: vec![0; (MAX_PRIORITY + 1) as usize],
            last_priority: None,
            run_length: 0,
        }
    }

    fn detach_priority(&mut self, key: QueueKey, priority: u32) {
        self.by_priority[priority as usize].retain(|k| *k != key);
    }
}

/// Owns every process queue in the runtime. All operations are safe for
/// concurrent use.
pub struct ProcessQueueManager {
    inner: Mutex<Inner>,
    cond: Condvar,
    key_manager: Arc<QueueKeyManager>,
    backpressure_events: Counter,
    evicted_events: Counter,
}

impl ProcessQueueManager {
    pub fn new(key_manager: Arc<QueueKeyManager>) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            cond: Condvar::new(),
            key_manager,
            backpressure_events: Counter::new(),
            evicted_events: Counter::new(),
        }
    }

    /// Creates a bounded queue for `key`, or adjusts the priority of an
    /// existing one. Capacity starts at an implementation default until
    /// overridden with [`set_bounded_capacity`](Self::set_bounded_capacity).
    pub fn create_or_update_bounded_queue(&self, key: QueueKey, priority: u32) {
        self.create_or_update(key, priority, Discipline::Bounded, DEFAULT_BOUNDED_CAPACITY);
    }

    /// Creates a circular queue with the given capacity, or adjusts the
    /// priority and capacity of an existing one.
    pub fn create_or_update_circular_queue(&self, key: QueueKey, priority: u32, capacity: usize) {
        self.create_or_update(key, priority, Discipline::Circular, capacity.max(1));
    }

    fn create_or_update(&self, key: QueueKey, priority: u32, discipline: Discipline, capacity: usize) {
        let priority = priority.min(MAX_PRIORITY);
        let mut inner = self.inner.lock().unwrap();
        let existing = inner.queues.get(&key).map(|q| (q.discipline, q.priority));
        match existing {
            Some((old_discipline, old_priority)) if old_discipline == discipline => {
                if old_priority != priority {
                    inner.detach_priority(key, old_priority);
                    inner.by_priority[priority as usize].push(key);
                }
                if let Some(queue) = inner.queues.get_mut(&key) {
                    queue.priority = priority;
                    if discipline == Discipline::Circular {
                        queue.capacity = capacity;
                    }
                }
            }
            Some((_, old_priority)) => {
                // Discipline changed: rebuild, dropping whatever was queued.
                warn!("process queue {} changed discipline, resetting", key);
                inner.detach_priority(key, old_priority);
                inner
                    .queues
                    .insert(key, ProcessQueue::new(priority, discipline, capacity));
                inner.by_priority[priority as usize].push(key);
            }
            None => {
                inner
                    .queues
                    .insert(key, ProcessQueue::new(priority, discipline, capacity));
                inner.by_priority[priority as usize].push(key);
                self.key_manager.retain(key);
            }
        }
    }

    /// Overrides a bounded queue's capacity.
    pub fn set_bounded_capacity(&self, key: QueueKey, capacity: usize) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.queues.get_mut(&key) {
            Some(queue) if queue.discipline == Discipline::Bounded => {
                queue.capacity = capacity.max(1);
                queue.push_blocked = queue.items.len() >= queue.capacity;
                true
            }
            _ => false,
        }
    }

    /// Registers the callbacks fired when the queue drains below its low
    /// watermark, one per distinct input kind feeding the pipeline.
    pub fn set_feedback_interfaces(&self, key: QueueKey, feedbacks: Vec<Arc<dyn Feedback>>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.queues.get_mut(&key) {
            Some(queue) => {
                queue.feedbacks = feedbacks;
                true
            }
            None => false,
        }
    }

    /// Declares the sink queues consumed by this pipeline; while any of them
    /// is full the process queue is ineligible for popping.
    pub fn set_downstream_queues(&self, key: QueueKey, downstream: Vec<Arc<SinkQueue>>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.queues.get_mut(&key) {
            Some(queue) => {
                queue.downstream = downstream;
                true
            }
            None => false,
        }
    }

    pub fn enable_pop(&self, key: QueueKey) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(queue) = inner.queues.get_mut(&key) {
            queue.pop_enabled = true;
        }
        drop(inner);
        self.cond.notify_all();
    }

    pub fn disable_pop(&self, key: QueueKey) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(queue) = inner.queues.get_mut(&key) {
            queue.pop_enabled = false;
        }
    }

    /// Enqueues an item, honoring the queue's discipline.
    pub fn push(&self, key: QueueKey, item: ProcessQueueItem) -> PipelineResult<PushResult> {
        let mut inner = self.inner.lock().unwrap();
        let queue = inner
            .queues
            .get_mut(&key)
            .ok_or(PipelineError::QueueNotFound(key))?;
        if queue.draining {
            return Ok(PushResult::Backpressured);
        }
        let result = match queue.discipline {
            Discipline::Bounded => {
                if queue.push_blocked {
                    self.backpressure_events.inc();
                    return Ok(PushResult::Backpressured);
                }
                queue.items.push_back(item);
                if queue.items.len() >= queue.capacity {
                    queue.push_blocked = true;
                }
                PushResult::Pushed
            }
            Discipline::Circular => {
                let mut result = PushResult::Pushed;
                if queue.items.len() >= queue.capacity {
                    if let Some(evicted) = queue.items.pop_front() {
                        self.evicted_events.add(evicted.group.event_count() as u64);
                        debug!("circular queue {} full, evicted oldest group", key);
                        result = PushResult::Evicted;
                    }
                }
                queue.items.push_back(item);
                result
            }
        };
        drop(inner);
        self.cond.notify_one();
        Ok(result)
    }

    /// Pops the next item across all queues under the priority-fair policy.
    pub fn try_pop(&self) -> Option<(QueueKey, ProcessQueueItem)> {
        let (popped, feedbacks) = {
            let mut inner = self.inner.lock().unwrap();
            match self.pop_locked(&mut inner) {
                Some((key, item, feedbacks)) => (Some((key, item)), feedbacks),
                None => (None, Vec::new()),
            }
        };
        // Fire un-throttle callbacks outside the manager lock.
        if let Some((key, _)) = &popped {
            for feedback in feedbacks {
                feedback.feedback(*key);
            }
        }
        popped
    }

    /// Blocking pop with a timeout, for consumer worker loops.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<(QueueKey, ProcessQueueItem)> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(popped) = self.try_pop() {
                return Some(popped);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            // Wake on pushes, but re-check periodically: downstream sink
            // queues can open up without any push happening.
            let wait = POP_POLL_INTERVAL.min(deadline - now);
            let inner = self.inner.lock().unwrap();
            let _unused = self.cond.wait_timeout(inner, wait).unwrap();
        }
    }

    fn pop_locked(
        &self,
        inner: &mut Inner,
    ) -> Option<(QueueKey, ProcessQueueItem, Vec<Arc<dyn Feedback>>)> {
        let priorities = self.priority_order(inner);
        for priority in priorities {
            let level = priority as usize;
            let keys = inner.by_priority[level].clone();
            if keys.is_empty() {
                continue;
            }
            let cursor = inner.cursors[level];
            for i in 0..keys.len() {
                let idx = (cursor + i) % keys.len();
                let key = keys[idx];
                let Some(queue) = inner.queues.get_mut(&key) else {
                    continue;
                };
                if !queue.eligible_for_pop() {
                    continue;
                }
                let item = queue.items.pop_front()?;
                let mut feedbacks = Vec::new();
                if queue.discipline == Discipline::Bounded
                    && queue.push_blocked
                    && queue.items.len() <= queue.low_watermark()
                {
                    queue.push_blocked = false;
                    feedbacks = queue.feedbacks.clone();
                }
                let drained_away = queue.draining && queue.items.is_empty();
                inner.cursors[level] = (idx + 1) % keys.len();
                if inner.last_priority == Some(priority) {
                    inner.run_length += 1;
                } else {
                    inner.last_priority = Some(priority);
                    inner.run_length = 1;
                }
                if drained_away {
                    self.remove_queue(inner, key);
                }
                return Some((key, item, feedbacks));
            }
        }
        None
    }

    /// Priority visit order for the next pop. Normally highest first; once a
    /// level has been served [`MAX_CONSECUTIVE_POPS`] times in a row, lower
    /// levels get one chance first.
    fn priority_order(&self, inner: &Inner) -> Vec<u32> {
        match inner.last_priority {
            Some(last) if inner.run_length >= MAX_CONSECUTIVE_POPS && last < MAX_PRIORITY => {
                ((last + 1)..=MAX_PRIORITY).chain(0..=last).collect()
            }
            _ => (0..=MAX_PRIORITY).collect(),
        }
    }

    /// Current depth of a queue, if it exists.
    pub fn depth(&self, key: QueueKey) -> Option<usize> {
        let inner = self.inner.lock().unwrap();
        inner.queues.get(&key).map(|q| q.items.len())
    }

    /// Total groups rejected with backpressure so far.
    pub fn backpressure_events(&self) -> u64 {
        self.backpressure_events.value()
    }

    /// Total events evicted from circular queues so far.
    pub fn evicted_events(&self) -> u64 {
        self.evicted_events.value()
    }

    /// Tears the queue down. A non-empty queue keeps accepting pops until
    /// drained, then disappears; pushes are refused immediately.
    pub fn delete_queue(&self, key: QueueKey) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let now_empty = match inner.queues.get_mut(&key) {
            Some(queue) => {
                if queue.items.is_empty() {
                    true
                } else {
                    info!("process queue {} delete deferred until drained", key);
                    queue.draining = true;
                    false
                }
            }
            None => return false,
        };
        if now_empty {
            self.remove_queue(&mut inner, key);
        }
        true
    }

    fn remove_queue(&self, inner: &mut Inner, key: QueueKey) {
        if let Some(queue) = inner.queues.remove(&key) {
            inner.detach_priority(key, queue.priority);
            self.key_manager.release(key);
        }
    }
}
