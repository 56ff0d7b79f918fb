//! Core plugin traits: inputs, processors, and sinks.
//!
//! All steady-state entry points take `&self`: a pipeline's plugin lists are
//! immutable between Start and Stop, so Process/Send run lock-free at the
//! pipeline level. Plugins keep mutable state behind atomics or their own
//! locks.

use std::sync::Arc;

use serde_json::Value;
use telemetry_types::EventGroup;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::instance::ProcessorInstance;
use crate::monitor::MetricsRecord;
use crate::queue::QueueKey;

/// Identity of a plugin within its pipeline: a monotonic id plus the id of
/// the next plugin in the chain (`-1` when this is the last one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginMeta {
    pub plugin_id: u32,
    pub node_id: u32,
    pub child_node_id: i32,
}

/// Sentinel child node id for the last plugin of a pipeline.
pub const LAST_CHILD_NODE_ID: i32 = -1;

/// An event source. Concrete reading (file tailing, container stdio, network
/// scraping) lives outside the core; the plugin carries the declarative
/// surface the runtime assembles and validates against.
pub trait Input: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns an optional extended sub-pipeline fragment to merge when part
    /// of this input's flow runs in the extended runtime.
    fn init(
        &mut self,
        detail: &Value,
        ctx: &Arc<PipelineContext>,
        input_index: usize,
        metrics: MetricsRecord,
    ) -> PipelineResult<Option<Value>>;

    fn start(&self) -> PipelineResult<()>;

    fn stop(&self, is_removing: bool) -> PipelineResult<()>;

    /// Whether this input can honor per-batch acknowledgements. Decides the
    /// pipeline's process-queue discipline; mixing capabilities within one
    /// pipeline is a config error.
    fn support_ack(&self) -> bool;

    /// Input-specific processors run before the shared chain.
    fn inner_processors(&self) -> &[ProcessorInstance] {
        &[]
    }

    /// Exactly-once concurrency, 0 when disabled. Only the file-tailing
    /// input supports it.
    fn exactly_once_concurrency(&self) -> u32 {
        0
    }
}

/// An in-place event-group transformer.
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    fn init(
        &mut self,
        detail: &Value,
        ctx: &Arc<PipelineContext>,
        metrics: MetricsRecord,
    ) -> PipelineResult<()>;

    /// Mutates groups in place. Leaving a group empty means every event was
    /// filtered out.
    fn process(&self, groups: &mut Vec<EventGroup>);
}

/// An event destination backed by a sink queue.
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns an optional extended sub-pipeline fragment when this sink must
    /// be reached through the extended runtime.
    fn init(
        &mut self,
        detail: &Value,
        ctx: &Arc<PipelineContext>,
        meta: PluginMeta,
        metrics: MetricsRecord,
    ) -> PipelineResult<Option<Value>>;

    fn start(&self) -> PipelineResult<()>;

    fn stop(&self, is_removing: bool) -> PipelineResult<()>;

    /// Accepts ownership of a group, typically batching it and eventually
    /// moving it into the sink queue.
    fn send(&self, group: EventGroup) -> PipelineResult<()>;

    /// Moves any partial batch into the sink queue. Returns false when some
    /// buffered data could not be handed over.
    fn flush_all(&self) -> bool;

    /// The sink queue reserved by this instance during init.
    fn queue_key(&self) -> Option<QueueKey>;
}
