//! The agent runtime: composition root and worker scheduling.
//!
//! Owns the collaborators that the original design kept as process-wide
//! singletons (registry, queue managers, key manager, flush manager) and
//! passes them into pipelines explicitly. Also runs the process-queue
//! worker threads and the sink worker pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::Value;
use telemetry_types::EventGroup;
use tracing::{debug, error, info, warn};

use crate::batch::TimeoutFlushManager;
use crate::config::PipelineConfig;
use crate::context::RuntimeServices;
use crate::error::{PipelineError, PipelineResult};
use crate::extended::{ExtendedRuntime, NoopExtendedRuntime};
use crate::monitor::{Alarm, AlarmKind, AlarmSender};
use crate::pipeline::Pipeline;
use crate::plugins::{register_builtin_plugins, LoggingTransport};
use crate::queue::{
    FeedbackRegistry, ProcessQueueItem, ProcessQueueManager, PushResult, QueueKey,
    QueueKeyManager, SinkQueueManager, SinkTransport,
};
use crate::registry::PluginRegistry;

const WORKER_POP_TIMEOUT: Duration = Duration::from_millis(50);
const PARK_POLL_INTERVAL: Duration = Duration::from_secs(1);
const PARK_MAX_LIFETIME: Duration = Duration::from_secs(60);

/// Knobs of the composition root.
pub struct RuntimeOptions {
    pub extended: Arc<dyn ExtendedRuntime>,
    pub remote_transport: Arc<dyn SinkTransport>,
    pub process_workers: usize,
    pub sink_workers: usize,
    /// Soft deadline for a pipeline stop before it is parked.
    pub stop_deadline: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            extended: Arc::new(NoopExtendedRuntime),
            remote_transport: Arc::new(LoggingTransport),
            process_workers: 2,
            sink_workers: 2,
            stop_deadline: Duration::from_secs(3),
        }
    }
}

struct ParkedStop {
    name: String,
    handle: JoinHandle<()>,
    parked_at: Instant,
}

/// The agent runtime.
pub struct Runtime {
    registry: PluginRegistry,
    services: RuntimeServices,
    extended: Arc<dyn ExtendedRuntime>,
    alarm_rx: flume::Receiver<Alarm>,
    pipelines: Arc<RwLock<HashMap<String, Arc<Pipeline>>>>,
    pipelines_by_key: Arc<RwLock<HashMap<QueueKey, Arc<Pipeline>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    parked_stops: Arc<Mutex<Vec<ParkedStop>>>,
    process_workers: usize,
    sink_workers: usize,
    stop_deadline: Duration,
}

impl Runtime {
    pub fn new(options: RuntimeOptions) -> PipelineResult<Runtime> {
        let key_manager = Arc::new(QueueKeyManager::new());
        let (alarm, alarm_rx) = AlarmSender::channel();
        let services = RuntimeServices {
            key_manager: key_manager.clone(),
            process_queues: Arc::new(ProcessQueueManager::new(key_manager.clone())),
            sink_queues: Arc::new(SinkQueueManager::new(key_manager, alarm.clone())),
            flush_manager: Arc::new(TimeoutFlushManager::new()),
            feedbacks: Arc::new(FeedbackRegistry::new()),
            alarm,
        };
        let mut registry = PluginRegistry::new();
        register_builtin_plugins(&mut registry, &services.feedbacks, options.remote_transport)?;
        Ok(Runtime {
            registry,
            services,
            extended: options.extended,
            alarm_rx,
            pipelines: Arc::new(RwLock::new(HashMap::new())),
            pipelines_by_key: Arc::new(RwLock::new(HashMap::new())),
            workers: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
            parked_stops: Arc::new(Mutex::new(Vec::new())),
            process_workers: options.process_workers,
            sink_workers: options.sink_workers,
            stop_deadline: options.stop_deadline,
        })
    }

    /// The plugin registry, for registering additional native plugins before
    /// any pipeline is built.
    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    pub fn services(&self) -> &RuntimeServices {
        &self.services
    }

    /// Receiving end of the alarm channel, drained by the external alarm
    /// transport.
    pub fn alarms(&self) -> &flume::Receiver<Alarm> {
        &self.alarm_rx
    }

    /// Starts worker threads: process-queue consumers, the sink worker pool,
    /// the timeout flush timer, and the parked-stop reaper.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.services.flush_manager.start();
        self.services.sink_queues.start_workers(self.sink_workers);

        let mut workers = self.workers.lock().unwrap();
        for i in 0..self.process_workers {
            let process_queues = self.services.process_queues.clone();
            let by_key = self.pipelines_by_key.clone();
            let running = self.running.clone();
            let handle = thread::Builder::new()
                .name(format!("process-worker-{i}"))
                .spawn(move || process_worker_loop(process_queues, by_key, running))
                .unwrap();
            workers.push(handle);
        }

        let reaper = {
            let parked = self.parked_stops.clone();
            let running = self.running.clone();
            let alarm = self.services.alarm.clone();
            thread::Builder::new()
                .name("stop-reaper".to_string())
                .spawn(move || reaper_loop(parked, running, alarm))
                .unwrap()
        };
        workers.push(reaper);
        info!("runtime started with {} process workers", self.process_workers);
    }

    /// Builds, registers, and starts a pipeline from a config tree.
    pub fn load_pipeline(&self, config: Value) -> PipelineResult<()> {
        let config = PipelineConfig::from_value(config)?;
        self.load_pipeline_config(config)
    }

    pub fn load_pipeline_config(&self, config: PipelineConfig) -> PipelineResult<()> {
        let name = config.name.clone();
        if self.is_stop_parked(&name) {
            return Err(PipelineError::StopPending { name });
        }
        if self.pipelines.read().unwrap().contains_key(&name) {
            return Err(PipelineError::invalid_config(format!(
                "pipeline '{name}' already exists, stop it before loading a new version"
            )));
        }

        let pipeline = Arc::new(Pipeline::init(
            config,
            &self.registry,
            self.services.clone(),
            self.extended.clone(),
        )?);

        self.pipelines
            .write()
            .unwrap()
            .insert(name.clone(), pipeline.clone());
        if let Some(key) = pipeline.context().process_queue_key() {
            self.pipelines_by_key
                .write()
                .unwrap()
                .insert(key, pipeline.clone());
        }

        if let Err(e) = pipeline.start() {
            error!("pipeline start failed, config: {}: {}", name, e);
            self.pipelines.write().unwrap().remove(&name);
            if let Some(key) = pipeline.context().process_queue_key() {
                self.pipelines_by_key.write().unwrap().remove(&key);
            }
            pipeline.stop(true);
            pipeline.remove_queues();
            return Err(e);
        }
        Ok(())
    }

    /// Stops a pipeline on a watchdog thread. If the stop outlives the soft
    /// deadline it is parked and retried out of band; this call never blocks
    /// past the deadline.
    pub fn stop_pipeline(&self, name: &str, is_removing: bool) -> PipelineResult<()> {
        let pipeline = self
            .pipelines
            .write()
            .unwrap()
            .remove(name)
            .ok_or_else(|| PipelineError::PipelineNotFound {
                name: name.to_string(),
            })?;
        if let Some(key) = pipeline.context().process_queue_key() {
            self.pipelines_by_key.write().unwrap().remove(&key);
        }

        let worker = pipeline.clone();
        let handle = thread::Builder::new()
            .name(format!("stop-{name}"))
            .spawn(move || {
                worker.stop(is_removing);
                if is_removing {
                    worker.remove_queues();
                }
            })?;

        let deadline = Instant::now() + self.stop_deadline;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                error!("pipeline stop panicked, config: {}", name);
            }
            return Ok(());
        }

        warn!(
            "pipeline stop exceeded the soft deadline, parking, config: {}",
            name
        );
        self.parked_stops.lock().unwrap().push(ParkedStop {
            name: name.to_string(),
            handle,
            parked_at: Instant::now(),
        });
        Ok(())
    }

    pub fn pipeline(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.read().unwrap().get(name).cloned()
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        self.pipelines.read().unwrap().keys().cloned().collect()
    }

    fn is_stop_parked(&self, name: &str) -> bool {
        self.parked_stops
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.name == name)
    }

    /// Pushes a group into a pipeline's process queue on behalf of the input
    /// at `input_index`.
    pub fn push_group(
        &self,
        pipeline_name: &str,
        group: EventGroup,
        input_index: usize,
    ) -> PipelineResult<PushResult> {
        let pipeline =
            self.pipeline(pipeline_name)
                .ok_or_else(|| PipelineError::PipelineNotFound {
                    name: pipeline_name.to_string(),
                })?;
        let key = pipeline
            .context()
            .process_queue_key()
            .ok_or_else(|| PipelineError::invalid_config("pipeline has no process queue"))?;
        self.services
            .process_queues
            .push(key, ProcessQueueItem::new(group, input_index))
    }

    /// Stops every pipeline and worker. Pipelines flush their batches; sink
    /// queues are force-drained at the end.
    pub fn shutdown(&self) {
        for name in self.pipeline_names() {
            if let Err(e) = self.stop_pipeline(&name, false) {
                warn!("shutdown: failed to stop pipeline '{}': {}", name, e);
            }
        }
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            if handle.join().is_err() {
                error!("runtime worker panicked during shutdown");
            }
        }
        self.services.sink_queues.flush_all();
        self.services.sink_queues.stop_workers();
        self.services.flush_manager.stop();
        info!("runtime shut down");
    }
}

fn process_worker_loop(
    process_queues: Arc<ProcessQueueManager>,
    pipelines_by_key: Arc<RwLock<HashMap<QueueKey, Arc<Pipeline>>>>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        let Some((key, item)) = process_queues.pop_timeout(WORKER_POP_TIMEOUT) else {
            continue;
        };
        let pipeline = pipelines_by_key.read().unwrap().get(&key).cloned();
        match pipeline {
            Some(pipeline) => {
                let mut groups = vec![item.group];
                pipeline.process(&mut groups, item.input_index);
                groups.retain(|g| !g.is_empty());
                if !groups.is_empty() && !pipeline.send(groups) {
                    debug!("send reported failures, config: {}", pipeline.name());
                }
            }
            None => {
                warn!("popped a group for an unknown pipeline, queue key {}", key);
            }
        }
    }
    debug!("process worker exiting");
}

fn reaper_loop(
    parked: Arc<Mutex<Vec<ParkedStop>>>,
    running: Arc<AtomicBool>,
    alarm: AlarmSender,
) {
    while running.load(Ordering::SeqCst) {
        thread::sleep(PARK_POLL_INTERVAL);
        let mut parked = parked.lock().unwrap();
        let mut remaining = Vec::new();
        for stop in parked.drain(..) {
            if stop.handle.is_finished() {
                info!("parked stop completed, config: {}", stop.name);
                if stop.handle.join().is_err() {
                    error!("parked stop panicked, config: {}", stop.name);
                }
            } else if stop.parked_at.elapsed() > PARK_MAX_LIFETIME {
                // Abandon: the handle is dropped and the thread detached.
                error!(
                    "parked stop abandoned after {:?}, config: {}",
                    PARK_MAX_LIFETIME, stop.name
                );
                alarm.send(Alarm {
                    kind: AlarmKind::ConfigError,
                    message: format!("pipeline '{}' failed to stop in time", stop.name),
                    project: String::new(),
                    logstore: String::new(),
                    region: String::new(),
                });
            } else {
                remaining.push(stop);
            }
        }
        *parked = remaining;
    }
}
