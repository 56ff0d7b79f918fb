//! A terminal sink that counts and discards everything it receives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use telemetry_types::EventGroup;
use tracing::debug;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::monitor::{Counter, MetricsRecord, METRIC_OUT_RECORDS_TOTAL};
use crate::plugin::{PluginMeta, Sink};
use crate::queue::{PushResult, QueueKey, SinkQueueParams, SinkRequest, SinkTransport};

struct DiscardTransport {
    delivered_events: Counter,
}

impl SinkTransport for DiscardTransport {
    fn deliver(&self, request: &SinkRequest) -> bool {
        self.delivered_events.add(request.event_count() as u64);
        true
    }
}

/// Counts events and drops them. Useful as a terminal drain in tests and
/// for measuring pipeline throughput without a real destination.
#[derive(Default)]
pub struct BlackholeSink {
    ctx: Option<Arc<PipelineContext>>,
    queue_key: OnceLock<QueueKey>,
    delivered_events: Counter,
    started: AtomicBool,
}

impl BlackholeSink {
    pub const NAME: &'static str = "sink_blackhole";

    pub fn delivered_events(&self) -> u64 {
        self.delivered_events.value()
    }
}

impl Sink for BlackholeSink {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn init(
        &mut self,
        _detail: &Value,
        ctx: &Arc<PipelineContext>,
        meta: PluginMeta,
        metrics: MetricsRecord,
    ) -> PipelineResult<Option<Value>> {
        self.delivered_events = metrics.counter(METRIC_OUT_RECORDS_TOTAL);
        let queue_name = format!("{}/{}/{}", ctx.name(), Self::NAME, meta.plugin_id);
        let key = ctx.services().key_manager.get_key(&queue_name);
        ctx.services().sink_queues.create_queue(
            key,
            SinkQueueParams::default(),
            Arc::new(DiscardTransport {
                delivered_events: self.delivered_events.clone(),
            }),
        )?;
        let _unused = self.queue_key.set(key);
        self.ctx = Some(ctx.clone());
        Ok(None)
    }

    fn start(&self) -> PipelineResult<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self, is_removing: bool) -> PipelineResult<()> {
        if !is_removing {
            self.flush_all();
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
        let request = SinkRequest::new(ctx.name(), vec![group]);
        match ctx.services().sink_queues.push(*key, request)? {
            PushResult::Pushed => Ok(()),
            other => {
                debug!("blackhole queue rejected a group: {:?}", other);
                Err(PipelineError::SendFailed {
                    sink: Self::NAME.to_string(),
                    message: format!("queue rejected group: {other:?}"),
                })
            }
        }
    }

    fn flush_all(&self) -> bool {
        match (&self.ctx, self.queue_key.get()) {
            (Some(ctx), Some(key)) => ctx.services().sink_queues.flush_queue(*key),
            _ => true,
        }
    }

    fn queue_key(&self) -> Option<QueueKey> {
        self.queue_key.get().copied()
    }
}
