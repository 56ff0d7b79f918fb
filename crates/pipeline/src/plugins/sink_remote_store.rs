//! The canonical remote-store sink.
//!
//! Batches events per pipeline and ships them through an injected transport;
//! the wire protocol itself is an external collaborator. Partial batches are
//! flushed by the timeout flush manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use telemetry_types::EventGroup;
use tracing::{debug, info, warn};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::monitor::{Counter, MetricsRecord, METRIC_IN_SIZE_BYTES, METRIC_OUT_SIZE_BYTES};
use crate::plugin::{PluginMeta, Sink};
use crate::queue::{QueueKey, SinkQueueManager, SinkQueueParams, SinkRequest, SinkTransport};

const DEFAULT_MAX_BATCH_EVENTS: usize = 4096;
const DEFAULT_MAX_BATCH_BYTES: usize = 512 * 1024;
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 3;

/// Transport used when no real remote endpoint is wired in: logs the batch
/// and reports success.
pub struct LoggingTransport;

impl SinkTransport for LoggingTransport {
    fn deliver(&self, request: &SinkRequest) -> bool {
        info!(
            "remote store delivery (no transport configured): pipeline '{}', {} events",
            request.pipeline,
            request.event_count()
        );
        true
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RemoteStoreParams {
    #[serde(rename = "Project")]
    project: Option<String>,
    #[serde(rename = "Logstore")]
    logstore: Option<String>,
    #[serde(rename = "Region")]
    region: Option<String>,
    #[serde(rename = "MaxBatchEvents")]
    max_batch_events: Option<usize>,
    #[serde(rename = "MaxBatchBytes")]
    max_batch_bytes: Option<usize>,
    #[serde(rename = "FlushIntervalSecs")]
    flush_interval_secs: Option<u64>,
    #[serde(rename = "QueueCapacity")]
    queue_capacity: Option<usize>,
    #[serde(rename = "MaxSendConcurrency")]
    max_send_concurrency: Option<usize>,
}

#[derive(Default)]
struct BatchBuffer {
    groups: Vec<EventGroup>,
    events: usize,
    bytes: usize,
}

impl BatchBuffer {
    fn add(&mut self, group: EventGroup) {
        self.events += group.event_count();
        self.bytes += group.data_size();
        self.groups.push(group);
    }

    fn take(&mut self) -> Vec<EventGroup> {
        self.events = 0;
        self.bytes = 0;
        std::mem::take(&mut self.groups)
    }
}

/// Moves the buffered batch into the sink queue. Returns false and puts the
/// batch back when the queue has no room.
fn flush_buffer(
    pipeline: &str,
    state: &Mutex<BatchBuffer>,
    sink_queues: &SinkQueueManager,
    key: QueueKey,
    out_size_bytes: &Counter,
) -> bool {
    let (groups, bytes) = {
        let mut buffer = state.lock().unwrap();
        if buffer.groups.is_empty() {
            return true;
        }
        let bytes = buffer.bytes;
        (buffer.take(), bytes)
    };
    let request = SinkRequest::new(pipeline, groups);
    match sink_queues.try_push(key, request) {
        Ok(Ok(())) => {
            out_size_bytes.add(bytes as u64);
            true
        }
        Ok(Err(rejected)) => {
            warn!(
                "sink queue {} has no room, batch kept for retry, pipeline: {}",
                key, pipeline
            );
            let mut buffer = state.lock().unwrap();
            for group in rejected.into_groups() {
                buffer.add(group);
            }
            false
        }
        Err(e) => {
            warn!("sink queue {} unavailable, batch dropped: {}", key, e);
            false
        }
    }
}

/// Sink shipping batches to the canonical remote store.
pub struct RemoteStoreSink {
    project: String,
    logstore: String,
    region: String,
    max_batch_events: usize,
    max_batch_bytes: usize,
    flush_interval: Duration,
    batch: Arc<Mutex<BatchBuffer>>,
    queue_key: OnceLock<QueueKey>,
    ctx: Option<Arc<PipelineContext>>,
    transport: Arc<dyn SinkTransport>,
    in_size_bytes: Counter,
    out_size_bytes: Counter,
    started: AtomicBool,
}

impl RemoteStoreSink {
    pub const NAME: &'static str = "sink_remote_store";

    pub fn new(transport: Arc<dyn SinkTransport>) -> Self {
        Self {
            project: String::new(),
            logstore: String::new(),
            region: String::new(),
            max_batch_events: DEFAULT_MAX_BATCH_EVENTS,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            batch: Arc::new(Mutex::new(BatchBuffer::default())),
            queue_key: OnceLock::new(),
            ctx: None,
            transport,
            in_size_bytes: Counter::new(),
            out_size_bytes: Counter::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn logstore(&self) -> &str {
        &self.logstore
    }

    fn flush_to_queue(&self) -> bool {
        let (Some(ctx), Some(key)) = (&self.ctx, self.queue_key.get()) else {
            return true;
        };
        flush_buffer(
            ctx.name(),
            &self.batch,
            &ctx.services().sink_queues,
            *key,
            &self.out_size_bytes,
        )
    }
}

impl Default for RemoteStoreSink {
    fn default() -> Self {
        Self::new(Arc::new(LoggingTransport))
    }
}

impl Sink for RemoteStoreSink {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn init(
        &mut self,
        detail: &Value,
        ctx: &Arc<PipelineContext>,
        _meta: PluginMeta,
        metrics: MetricsRecord,
    ) -> PipelineResult<Option<Value>> {
        let params: RemoteStoreParams = serde_json::from_value(detail.clone())
            .map_err(|e| PipelineError::plugin_init(Self::NAME, e.to_string()))?;
        self.project = params.project.unwrap_or_else(|| ctx.project().to_string());
        self.logstore = params.logstore.unwrap_or_else(|| ctx.logstore().to_string());
        self.region = params.region.unwrap_or_else(|| ctx.region().to_string());
        if let Some(events) = params.max_batch_events {
            self.max_batch_events = events.max(1);
        }
        if let Some(bytes) = params.max_batch_bytes {
            self.max_batch_bytes = bytes.max(1);
        }
        if let Some(secs) = params.flush_interval_secs {
            self.flush_interval = Duration::from_secs(secs.max(1));
        }
        self.in_size_bytes = metrics.counter(METRIC_IN_SIZE_BYTES);
        self.out_size_bytes = metrics.counter(METRIC_OUT_SIZE_BYTES);

        // Queue identity covers the remote destination, so two sinks of one
        // pipeline pointing at the same store collide at init.
        let queue_name = format!(
            "{}/{}#{}#{}",
            ctx.name(),
            self.project,
            self.logstore,
            self.region
        );
        let key = ctx.services().key_manager.get_key(&queue_name);
        let mut queue_params = SinkQueueParams::default();
        if let Some(capacity) = params.queue_capacity {
            queue_params.capacity = capacity.max(1);
        }
        if let Some(concurrency) = params.max_send_concurrency {
            queue_params.max_in_flight = concurrency.max(1);
        }
        ctx.services()
            .sink_queues
            .create_queue(key, queue_params, self.transport.clone())?;
        let _unused = self.queue_key.set(key);
        self.ctx = Some(ctx.clone());
        Ok(None)
    }

    fn start(&self) -> PipelineResult<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self, is_removing: bool) -> PipelineResult<()> {
        if !is_removing && !self.flush_all() {
            warn!("remote store sink stopped with undelivered batch data");
        }
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, group: EventGroup) -> PipelineResult<()> {
        let (Some(ctx), Some(key)) = (&self.ctx, self.queue_key.get()) else {
            return Err(PipelineError::SendFailed {
                sink: Self::NAME.to_string(),
                message: "sink not initialized".to_string(),
            });
        };
        self.in_size_bytes.add(group.data_size() as u64);

        let (flush_now, arm_timer) = {
            let mut buffer = self.batch.lock().unwrap();
            let was_empty = buffer.groups.is_empty();
            buffer.add(group);
            (
                buffer.events >= self.max_batch_events || buffer.bytes >= self.max_batch_bytes,
                was_empty,
            )
        };

        if flush_now {
            debug!("batch threshold reached, flushing to sink queue {}", key);
            if !self.flush_to_queue() {
                return Err(PipelineError::SendFailed {
                    sink: Self::NAME.to_string(),
                    message: format!("sink queue {key} has no room"),
                });
            }
        } else if arm_timer {
            let pipeline = ctx.name().to_string();
            let state = Arc::clone(&self.batch);
            let sink_queues = Arc::clone(&ctx.services().sink_queues);
            let out_size_bytes = self.out_size_bytes.clone();
            let flush_key = key.0;
            ctx.services().flush_manager.update_record(
                &pipeline.clone(),
                flush_key,
                self.flush_interval,
                Arc::new(move || {
                    flush_buffer(
                        &pipeline,
                        &state,
                        &sink_queues,
                        QueueKey(flush_key),
                        &out_size_bytes,
                    );
                }),
            );
        }
        Ok(())
    }

    fn flush_all(&self) -> bool {
        if self.flush_to_queue() {
            return true;
        }
        // No room: drain the queue inline and try once more.
        if let (Some(ctx), Some(key)) = (&self.ctx, self.queue_key.get()) {
            ctx.services().sink_queues.flush_queue(*key);
        }
        self.flush_to_queue()
    }

    fn queue_key(&self) -> Option<QueueKey> {
        self.queue_key.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginMeta;
    use crate::testutil::{test_context, RecordingTransport};
    use serde_json::json;
    use telemetry_types::{Event, LogEvent, Timestamp};

    fn meta() -> PluginMeta {
        PluginMeta {
            plugin_id: 3,
            node_id: 3,
            child_node_id: -1,
        }
    }

    fn one_event_group() -> EventGroup {
        let mut group = EventGroup::new();
        let mut log = LogEvent::new(Timestamp::from_secs(0));
        log.set_content("content", "x");
        group.push_event(Event::Log(log));
        group
    }

    #[test]
    fn test_batch_flushes_at_event_threshold() {
        let ctx = test_context("remote");
        let transport = Arc::new(RecordingTransport::default());
        let mut sink = RemoteStoreSink::new(transport.clone());
        sink.init(
            &json!({"Project": "p", "Logstore": "l", "Region": "r", "MaxBatchEvents": 2}),
            &ctx,
            meta(),
            MetricsRecord::new(),
        )
        .unwrap();

        sink.send(one_event_group()).unwrap();
        let key = sink.queue_key().unwrap();
        assert_eq!(ctx.services().sink_queues.get_queue(key).unwrap().depth(), 0);

        sink.send(one_event_group()).unwrap();
        assert_eq!(ctx.services().sink_queues.get_queue(key).unwrap().depth(), 1);

        // Draining the queue hands the batch to the transport.
        assert!(ctx.services().sink_queues.flush_queue(key));
        assert_eq!(transport.delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_partial_batch_registers_timeout_record() {
        let ctx = test_context("remote");
        let mut sink = RemoteStoreSink::new(Arc::new(RecordingTransport::default()));
        sink.init(&json!({}), &ctx, meta(), MetricsRecord::new())
            .unwrap();

        sink.send(one_event_group()).unwrap();
        assert_eq!(ctx.services().flush_manager.pending("remote"), 1);

        assert!(sink.flush_all());
        let key = sink.queue_key().unwrap();
        assert_eq!(ctx.services().sink_queues.get_queue(key).unwrap().depth(), 1);
    }

    #[test]
    fn test_duplicate_destination_fails_init() {
        let ctx = test_context("remote");
        let mut first = RemoteStoreSink::default();
        first
            .init(&json!({"Project": "p", "Logstore": "l"}), &ctx, meta(), MetricsRecord::new())
            .unwrap();
        let mut second = RemoteStoreSink::default();
        let result = second.init(
            &json!({"Project": "p", "Logstore": "l"}),
            &ctx,
            meta(),
            MetricsRecord::new(),
        );
        assert!(matches!(result, Err(PipelineError::SinkQueueExists(_))));
    }
}
