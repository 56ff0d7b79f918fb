//! Plugin instance wrappers.
//!
//! An instance pairs a plugin with its pipeline-scoped identity and metric
//! record, and threads the record counters around the plugin's entry points.

use std::sync::Arc;

use serde_json::Value;
use telemetry_types::EventGroup;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::monitor::{
    Counter, MetricsRecord, METRIC_IN_RECORDS_TOTAL, METRIC_OUT_RECORDS_TOTAL,
};
use crate::plugin::{Input, PluginMeta, Processor, Sink};
use crate::queue::QueueKey;

pub struct InputInstance {
    plugin: Box<dyn Input>,
    meta: PluginMeta,
    metrics: MetricsRecord,
}

impl InputInstance {
    pub fn new(plugin: Box<dyn Input>, meta: PluginMeta) -> Self {
        Self {
            plugin,
            meta,
            metrics: MetricsRecord::new(),
        }
    }

    pub fn init(
        &mut self,
        detail: &Value,
        ctx: &Arc<PipelineContext>,
        input_index: usize,
    ) -> PipelineResult<Option<Value>> {
        self.plugin
            .init(detail, ctx, input_index, self.metrics.clone())
    }

    pub fn start(&self) -> PipelineResult<()> {
        self.plugin.start()
    }

    pub fn stop(&self, is_removing: bool) -> PipelineResult<()> {
        self.plugin.stop(is_removing)
    }

    pub fn name(&self) -> &'static str {
        self.plugin.name()
    }

    pub fn support_ack(&self) -> bool {
        self.plugin.support_ack()
    }

    pub fn inner_processors(&self) -> &[ProcessorInstance] {
        self.plugin.inner_processors()
    }

    pub fn exactly_once_concurrency(&self) -> u32 {
        self.plugin.exactly_once_concurrency()
    }

    pub fn meta(&self) -> PluginMeta {
        self.meta
    }

    pub fn metrics(&self) -> &MetricsRecord {
        &self.metrics
    }
}

pub struct ProcessorInstance {
    plugin: Box<dyn Processor>,
    meta: PluginMeta,
    metrics: MetricsRecord,
    in_records: Counter,
    out_records: Counter,
}

impl ProcessorInstance {
    pub fn new(plugin: Box<dyn Processor>, meta: PluginMeta) -> Self {
        let metrics = MetricsRecord::new();
        let in_records = metrics.counter(METRIC_IN_RECORDS_TOTAL);
        let out_records = metrics.counter(METRIC_OUT_RECORDS_TOTAL);
        Self {
            plugin,
            meta,
            metrics,
            in_records,
            out_records,
        }
    }

    pub fn init(&mut self, detail: &Value, ctx: &Arc<PipelineContext>) -> PipelineResult<()> {
        self.plugin.init(detail, ctx, self.metrics.clone())
    }

    pub fn process(&self, groups: &mut Vec<EventGroup>) {
        let before: usize = groups.iter().map(EventGroup::event_count).sum();
        self.in_records.add(before as u64);
        self.plugin.process(groups);
        let after: usize = groups.iter().map(EventGroup::event_count).sum();
        self.out_records.add(after as u64);
    }

    pub fn name(&self) -> &'static str {
        self.plugin.name()
    }

    pub fn meta(&self) -> PluginMeta {
        self.meta
    }

    pub fn metrics(&self) -> &MetricsRecord {
        &self.metrics
    }
}

pub struct SinkInstance {
    plugin: Box<dyn Sink>,
    meta: PluginMeta,
    metrics: MetricsRecord,
    in_records: Counter,
}

impl SinkInstance {
    pub fn new(plugin: Box<dyn Sink>, meta: PluginMeta) -> Self {
        let metrics = MetricsRecord::new();
        let in_records = metrics.counter(METRIC_IN_RECORDS_TOTAL);
        Self {
            plugin,
            meta,
            metrics,
            in_records,
        }
    }

    pub fn init(
        &mut self,
        detail: &Value,
        ctx: &Arc<PipelineContext>,
    ) -> PipelineResult<Option<Value>> {
        self.plugin
            .init(detail, ctx, self.meta, self.metrics.clone())
    }

    pub fn start(&self) -> PipelineResult<()> {
        self.plugin.start()
    }

    pub fn stop(&self, is_removing: bool) -> PipelineResult<()> {
        self.plugin.stop(is_removing)
    }

    pub fn send(&self, group: EventGroup) -> PipelineResult<()> {
        self.in_records.add(group.event_count() as u64);
        self.plugin.send(group)
    }

    pub fn flush_all(&self) -> bool {
        self.plugin.flush_all()
    }

    pub fn queue_key(&self) -> Option<QueueKey> {
        self.plugin.queue_key()
    }

    pub fn name(&self) -> &'static str {
        self.plugin.name()
    }

    pub fn meta(&self) -> PluginMeta {
        self.meta
    }

    pub fn metrics(&self) -> &MetricsRecord {
        &self.metrics
    }
}
