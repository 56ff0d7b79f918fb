//! Pipeline assembly and lifecycle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use telemetry_types::EventGroup;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::context::{PipelineContext, RuntimeServices};
use crate::error::{PipelineError, PipelineResult};
use crate::extended::{
    ExtendedPipeline, ExtendedRuntime, WITHOUT_INPUT_SUFFIX, WITH_INPUT_SUFFIX,
};
use crate::instance::{InputInstance, ProcessorInstance, SinkInstance};
use crate::monitor::{AlarmKind, Counter};
use crate::plugin::PluginMeta;
use crate::plugins::{ContainerStdioInput, FileInput, RemoteStoreSink};
use crate::queue::{Feedback, MAX_PRIORITY};
use crate::registry::PluginRegistry;
use crate::router::Router;

/// Capacity of circular process queues, used when inputs cannot honor acks.
const CIRCULAR_QUEUE_CAPACITY: usize = 100;
/// Log-queue size forced into the extended sub-pipeline when a tailing input
/// feeds extended processing.
const EXTENDED_LOG_QUEUE_SIZE: u32 = 10;
/// Soft deadline for each Stop stage; stages exceeding it are logged and the
/// runtime's watchdog may park the whole stop.
const STOP_STAGE_SOFT_DEADLINE: Duration = Duration::from_secs(3);

const STATE_BUILT: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// A fully assembled pipeline: inputs, processors, sinks, router, context,
/// and up to two extended sub-pipelines.
///
/// Mutated only during init; every steady-state entry point takes `&self`.
pub struct Pipeline {
    name: String,
    config: PipelineConfig,
    inputs: Vec<InputInstance>,
    processors: Vec<ProcessorInstance>,
    sinks: Vec<SinkInstance>,
    router: Router,
    context: Arc<PipelineContext>,
    extended_with_input: ExtendedPipeline,
    extended_without_input: ExtendedPipeline,
    extended_runtime: Arc<dyn ExtendedRuntime>,
    services: RuntimeServices,
    plugin_id: AtomicU32,
    plugin_counts: HashMap<String, HashMap<String, u32>>,
    state: AtomicU8,
    invalid_sink_index: Counter,
}

impl Pipeline {
    /// Builds a pipeline from a validated config.
    ///
    /// On error nothing leaks: created sink queues are torn down, no process
    /// queue key is reserved, no extended sub-pipeline stays loaded, and a
    /// config alarm is emitted.
    pub fn init(
        config: PipelineConfig,
        registry: &PluginRegistry,
        services: RuntimeServices,
        extended_runtime: Arc<dyn ExtendedRuntime>,
    ) -> PipelineResult<Pipeline> {
        config.validate()?;
        let context = Arc::new(PipelineContext::new(&config, services.clone()));
        let mut pipeline = Pipeline {
            name: config.name.clone(),
            config,
            inputs: Vec::new(),
            processors: Vec::new(),
            sinks: Vec::new(),
            router: Router::init(None, 0)?,
            context,
            extended_with_input: ExtendedPipeline::new(),
            extended_without_input: ExtendedPipeline::new(),
            extended_runtime,
            services,
            plugin_id: AtomicU32::new(0),
            plugin_counts: HashMap::new(),
            state: AtomicU8::new(STATE_BUILT),
            invalid_sink_index: Counter::new(),
        };
        match pipeline.build(registry) {
            Ok(()) => {
                info!("pipeline init succeeded, config: {}", pipeline.name);
                Ok(pipeline)
            }
            Err(e) => {
                error!("pipeline init failed, config: {}: {}", pipeline.name, e);
                pipeline
                    .context
                    .alarm(AlarmKind::ConfigError, e.to_string());
                pipeline.cleanup_failed_init();
                Err(e)
            }
        }
    }

    fn build(&mut self, registry: &PluginRegistry) -> PipelineResult<()> {
        let inputs_config = self.config.inputs.clone();
        let processors_config = self.config.processors.clone();
        let aggregators_config = self.config.aggregators.clone();
        let sinks_config = self.config.sinks.clone();
        let extensions_config = self.config.extensions.clone();
        let router_config = self.config.router.clone();

        // Inputs.
        for (index, plugin) in inputs_config.iter().enumerate() {
            let meta = self.gen_next_plugin_meta(false);
            match registry.create_input(&plugin.plugin_type, meta) {
                Some(mut input) => {
                    let fragment = input.init(&plugin.detail, &self.context, index)?;
                    if let Some(fragment) = fragment {
                        self.extended_with_input.merge(&fragment);
                    }
                    self.inputs.push(input);
                }
                None => self.extended_with_input.add_plugin("inputs", plugin),
            }
            self.count_plugin("inputs", &plugin.plugin_type);
        }

        // Processors.
        for plugin in &processors_config {
            let meta = self.gen_next_plugin_meta(false);
            match registry.create_processor(&plugin.plugin_type, meta) {
                Some(mut processor) => {
                    processor.init(&plugin.detail, &self.context)?;
                    self.processors.push(processor);
                }
                None => {
                    if self.should_extend_with_input() {
                        self.extended_with_input.add_plugin("processors", plugin);
                    } else {
                        self.extended_without_input.add_plugin("processors", plugin);
                    }
                }
            }
            self.count_plugin("processors", &plugin.plugin_type);
        }

        // Aggregators only exist in the extended runtime.
        for plugin in &aggregators_config {
            if self.should_extend_with_input() {
                self.extended_with_input.add_plugin("aggregators", plugin);
            } else {
                self.extended_without_input.add_plugin("aggregators", plugin);
            }
            self.count_plugin("aggregators", &plugin.plugin_type);
        }

        // Sinks.
        for plugin in &sinks_config {
            let meta = self.gen_next_plugin_meta(false);
            match registry.create_sink(&plugin.plugin_type, meta) {
                Some(mut sink) => {
                    let fragment = sink.init(&plugin.detail, &self.context)?;
                    if let Some(fragment) = fragment {
                        // A native sink reached through the extended runtime
                        // joins the currently active sub-pipeline.
                        if self.should_extend_with_input() {
                            self.extended_with_input.merge(&fragment);
                        } else {
                            self.extended_without_input.merge(&fragment);
                        }
                    }
                    self.sinks.push(sink);
                }
                None => {
                    if self.should_extend_with_input() {
                        self.extended_with_input.add_plugin("flushers", plugin);
                    } else {
                        self.extended_without_input.add_plugin("flushers", plugin);
                    }
                }
            }
            self.count_plugin("flushers", &plugin.plugin_type);
        }

        // Routing only applies to native sinks, so config indices equal
        // `self.sinks` indices.
        self.router = Router::init(router_config.as_deref(), self.sinks.len())?;

        // Extensions go to every extended sub-pipeline that exists.
        for plugin in &extensions_config {
            if !self.extended_with_input.is_empty() {
                self.extended_with_input.add_plugin("extensions", plugin);
            }
            if !self.extended_without_input.is_empty() {
                self.extended_without_input.add_plugin("extensions", plugin);
            }
            self.count_plugin("extensions", &plugin.plugin_type);
        }

        self.propagate_global_params();
        self.validate_assembly()?;
        self.load_extended_pipelines()?;
        self.setup_process_queue();
        Ok(())
    }

    /// Global parameters flow into extended sub-pipelines: unknown keys of
    /// the `global` block verbatim, then the native options the extended
    /// runtime must agree on.
    fn propagate_global_params(&mut self) {
        let global = self.context.global().clone();
        for sub in [&mut self.extended_with_input, &mut self.extended_without_input] {
            if sub.is_empty() {
                continue;
            }
            for (key, value) in &global.extended_params {
                sub.set_global_param(key, value.clone());
            }
            sub.set_global_param(
                "EnableTimestampNanosecond",
                Value::Bool(global.enable_timestamp_nanosecond),
            );
            sub.set_global_param(
                "UsingOldContentTag",
                Value::Bool(global.using_old_content_tag),
            );
        }

        // A tailing input feeding extended processing needs a larger log
        // queue on the extended side.
        let has_tailing_input = self
            .inputs
            .iter()
            .any(|i| i.name() == FileInput::NAME || i.name() == ContainerStdioInput::NAME);
        if has_tailing_input && self.is_flushing_through_extended() {
            self.extended_without_input
                .set_global_param("DefaultLogQueueSize", Value::from(EXTENDED_LOG_QUEUE_SIZE));
        }
    }

    fn validate_assembly(&self) -> PipelineResult<()> {
        // Exactly-once pipelines are constrained to one file input feeding
        // the canonical remote store natively.
        let exactly_once = self
            .inputs
            .iter()
            .find(|i| i.name() == FileInput::NAME)
            .map(|i| i.exactly_once_concurrency())
            .unwrap_or(0);
        if exactly_once > 0 {
            if self.inputs.len() > 1 || !self.extended_with_input.is_empty() {
                return Err(PipelineError::invalid_config(
                    "exactly once enabled with an input other than the file input",
                ));
            }
            let has_remote_store = self
                .sinks
                .iter()
                .any(|s| s.name() == RemoteStoreSink::NAME);
            if self.sinks.len() > 1 || !has_remote_store {
                return Err(PipelineError::invalid_config(
                    "exactly once enabled with a sink other than the remote store",
                ));
            }
            if !self.extended_without_input.is_empty() {
                return Err(PipelineError::invalid_config(
                    "exactly once enabled with extended delegation",
                ));
            }
        }

        // All inputs must share one ack capability; it decides the process
        // queue discipline.
        if let Some(first) = self.inputs.first() {
            let support_ack = first.support_ack();
            if self.inputs.iter().any(|i| i.support_ack() != support_ack) {
                return Err(PipelineError::invalid_config(
                    "not all inputs share the same ack capability",
                ));
            }
        }

        // One sink queue per sink instance, no sharing within a pipeline.
        let mut seen = HashSet::new();
        for sink in &self.sinks {
            if let Some(key) = sink.queue_key() {
                if !seen.insert(key) {
                    return Err(PipelineError::invalid_config(format!(
                        "duplicate sink queue key {key} within pipeline"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Loads extended sub-pipelines atomically: the without-input part first,
    /// then the with-input part; a failure unloads whatever already loaded so
    /// a failed init leaves no residue.
    fn load_extended_pipelines(&self) -> PipelineResult<()> {
        let logstore_key = self
            .sinks
            .iter()
            .find_map(SinkInstance::queue_key)
            .map(|k| k.0)
            .unwrap_or(0);
        let mut loaded_without = false;
        if !self.extended_without_input.is_empty() {
            let id = format!("{}{}", self.name, WITHOUT_INPUT_SUFFIX);
            if !self.extended_runtime.load_pipeline(
                &id,
                self.extended_without_input.as_value(),
                self.context.project(),
                self.context.logstore(),
                self.context.region(),
                logstore_key,
            ) {
                return Err(PipelineError::ExtendedLoad { id });
            }
            loaded_without = true;
        }
        if !self.extended_with_input.is_empty() {
            let id = format!("{}{}", self.name, WITH_INPUT_SUFFIX);
            if !self.extended_runtime.load_pipeline(
                &id,
                self.extended_with_input.as_value(),
                self.context.project(),
                self.context.logstore(),
                self.context.region(),
                logstore_key,
            ) {
                if loaded_without {
                    self.extended_runtime
                        .unload_pipeline(&format!("{}{}", self.name, WITHOUT_INPUT_SUFFIX));
                }
                return Err(PipelineError::ExtendedLoad { id });
            }
        }
        Ok(())
    }

    /// Reserves the queue key and creates the process queue, then wires
    /// feedback interfaces and the downstream sink-queue set.
    fn setup_process_queue(&self) {
        let key = self.services.key_manager.get_key(&self.name);
        self.context.set_process_queue_key(key);

        let priority = match self.context.global().process_priority {
            0 => MAX_PRIORITY,
            p => (p - 1).min(MAX_PRIORITY),
        };
        let support_ack = self.inputs.first().map_or(true, InputInstance::support_ack);
        if support_ack {
            self.services
                .process_queues
                .create_or_update_bounded_queue(key, priority);
        } else {
            self.services.process_queues.create_or_update_circular_queue(
                key,
                priority,
                CIRCULAR_QUEUE_CAPACITY,
            );
        }

        // One feedback interface per distinct input kind.
        let mut feedbacks: Vec<Arc<dyn Feedback>> = Vec::new();
        let mut seen_kinds = HashSet::new();
        for input in &self.inputs {
            if seen_kinds.insert(input.name()) {
                if let Some(feedback) = self.services.feedbacks.get(input.name()) {
                    feedbacks.push(feedback);
                }
            }
        }
        self.services.process_queues.set_feedback_interfaces(key, feedbacks);

        let downstream: Vec<_> = self
            .sinks
            .iter()
            .filter_map(SinkInstance::queue_key)
            .filter_map(|k| self.services.sink_queues.get_queue(k))
            .collect();
        self.services.process_queues.set_downstream_queues(key, downstream);
    }

    fn cleanup_failed_init(&mut self) {
        for sink in &self.sinks {
            if let Some(key) = sink.queue_key() {
                self.services.sink_queues.delete_queue(key);
            }
        }
        self.sinks.clear();
        self.inputs.clear();
        self.processors.clear();
    }

    /// Starts sinks, enables the process queue, then starts inputs, so the
    /// egress side is ready before the first group can arrive.
    pub fn start(&self) -> PipelineResult<()> {
        if self
            .state
            .compare_exchange(STATE_BUILT, STATE_STARTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("pipeline start skipped, not in built state, config: {}", self.name);
            return Ok(());
        }
        for sink in &self.sinks {
            sink.start()?;
        }
        if let Some(key) = self.context.process_queue_key() {
            self.services.process_queues.enable_pop(key);
        }
        for input in &self.inputs {
            input.start()?;
        }
        info!("pipeline start succeeded, config: {}", self.name);
        Ok(())
    }

    /// Runs the input's inner processors, then the shared processor chain.
    /// Groups are mutated in place; an emptied group means everything was
    /// filtered.
    pub fn process(&self, groups: &mut Vec<EventGroup>, input_index: usize) {
        match self.inputs.get(input_index) {
            Some(input) => {
                for processor in input.inner_processors() {
                    processor.process(groups);
                }
            }
            None => {
                if !self.inputs.is_empty() {
                    warn!(
                        "process called with invalid input index {}, config: {}",
                        input_index, self.name
                    );
                }
            }
        }
        for processor in &self.processors {
            processor.process(groups);
        }
    }

    /// Routes each group and hands it to the selected sinks: deep copies for
    /// every non-terminal target, the original moved into the last one.
    /// Returns true iff every sub-send succeeded.
    pub fn send(&self, groups: Vec<EventGroup>) -> bool {
        let mut all_succeeded = true;
        for group in groups {
            let targets = self.router.route(&group);
            if targets.is_empty() {
                continue;
            }
            let mut remaining = Some(group);
            for (position, &sink_index) in targets.iter().enumerate() {
                let is_last = position + 1 == targets.len();
                if sink_index >= self.sinks.len() {
                    error!(
                        "unexpected error: invalid sink index {}, config: {}",
                        sink_index, self.name
                    );
                    self.invalid_sink_index.inc();
                    all_succeeded = false;
                    continue;
                }
                let to_send = if is_last {
                    match remaining.take() {
                        Some(group) => group,
                        None => break,
                    }
                } else {
                    match &remaining {
                        Some(group) => group.copy(),
                        None => break,
                    }
                };
                if let Err(e) = self.sinks[sink_index].send(to_send) {
                    error!(
                        "send to sink {} failed, config: {}: {}",
                        sink_index, self.name, e
                    );
                    all_succeeded = false;
                }
            }
        }
        all_succeeded
    }

    /// Flushes every sink's partial batch and clears the pipeline's timeout
    /// flush records.
    pub fn flush_batch(&self) -> bool {
        let mut all_succeeded = true;
        for sink in &self.sinks {
            all_succeeded &= sink.flush_all();
        }
        self.services.flush_manager.clear_records(&self.name);
        all_succeeded
    }

    /// Stops the pipeline in reverse start order. Safe to call twice: the
    /// second call is a no-op. Each stage carries a soft deadline; overruns
    /// are logged and the runtime watchdog may park the stop.
    pub fn stop(&self, is_removing: bool) {
        match self.state.swap(STATE_STOPPED, Ordering::SeqCst) {
            STATE_STARTED => {}
            _ => {
                info!("pipeline stop skipped, already stopped, config: {}", self.name);
                return;
            }
        }

        self.run_stop_stage("inputs", || {
            for input in &self.inputs {
                if let Err(e) = input.stop(is_removing) {
                    warn!("input stop failed, config: {}: {}", self.name, e);
                }
            }
        });

        if !self.extended_with_input.is_empty() {
            self.run_stop_stage("extended-with-input", || {
                self.extended_runtime
                    .unload_pipeline(&format!("{}{}", self.name, WITH_INPUT_SUFFIX));
            });
        }

        if let Some(key) = self.context.process_queue_key() {
            self.services.process_queues.disable_pop(key);
        }

        if !is_removing {
            self.run_stop_stage("flush-batch", || {
                self.flush_batch();
            });
        }

        if !self.extended_without_input.is_empty() {
            self.run_stop_stage("extended-without-input", || {
                self.extended_runtime
                    .unload_pipeline(&format!("{}{}", self.name, WITHOUT_INPUT_SUFFIX));
            });
        }

        self.run_stop_stage("sinks", || {
            for sink in &self.sinks {
                if let Err(e) = sink.stop(is_removing) {
                    warn!("sink stop failed, config: {}: {}", self.name, e);
                }
            }
        });

        info!("pipeline stop succeeded, config: {}", self.name);
    }

    fn run_stop_stage(&self, stage: &str, f: impl FnOnce()) {
        let started = Instant::now();
        f();
        let elapsed = started.elapsed();
        if elapsed > STOP_STAGE_SOFT_DEADLINE {
            warn!(
                "stop stage '{}' exceeded soft deadline ({:?}), config: {}",
                stage, elapsed, self.name
            );
        }
    }

    /// Deletes the pipeline's queues. Called by the runtime after a stop
    /// with `is_removing`.
    pub fn remove_queues(&self) {
        if let Some(key) = self.context.process_queue_key() {
            self.services.process_queues.delete_queue(key);
        }
        for sink in &self.sinks {
            if let Some(key) = sink.queue_key() {
                self.services.sink_queues.delete_queue(key);
            }
        }
    }

    fn gen_next_plugin_meta(&self, last_one: bool) -> PluginMeta {
        let id = self.plugin_id.fetch_add(1, Ordering::SeqCst) + 1;
        PluginMeta {
            plugin_id: id,
            node_id: id,
            child_node_id: if last_one {
                crate::plugin::LAST_CHILD_NODE_ID
            } else {
                id as i32 + 1
            },
        }
    }

    /// Delegated plugins join the with-input sub-pipeline until a native
    /// input or processor has claimed the head of the flow.
    fn should_extend_with_input(&self) -> bool {
        self.inputs.is_empty() && self.processors.is_empty()
    }

    fn count_plugin(&mut self, module: &str, plugin_type: &str) {
        *self
            .plugin_counts
            .entry(module.to_string())
            .or_default()
            .entry(plugin_type.to_string())
            .or_insert(0) += 1;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    pub fn inputs(&self) -> &[InputInstance] {
        &self.inputs
    }

    pub fn processors(&self) -> &[ProcessorInstance] {
        &self.processors
    }

    pub fn sinks(&self) -> &[SinkInstance] {
        &self.sinks
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn extended_with_input(&self) -> &ExtendedPipeline {
        &self.extended_with_input
    }

    pub fn extended_without_input(&self) -> &ExtendedPipeline {
        &self.extended_without_input
    }

    pub fn is_flushing_through_extended(&self) -> bool {
        !self.extended_without_input.is_empty()
    }

    pub fn plugin_count(&self, module: &str, plugin_type: &str) -> u32 {
        self.plugin_counts
            .get(module)
            .and_then(|m| m.get(plugin_type))
            .copied()
            .unwrap_or(0)
    }

    pub fn invalid_sink_index_count(&self) -> u64 {
        self.invalid_sink_index.value()
    }
}
