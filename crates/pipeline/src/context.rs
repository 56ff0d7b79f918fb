//! Per-pipeline shared facts exposed read-only to every plugin.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, TimeZone, Utc};

use crate::batch::TimeoutFlushManager;
use crate::config::{GlobalConfig, PipelineConfig};
use crate::monitor::{Alarm, AlarmKind, AlarmSender};
use crate::queue::{
    FeedbackRegistry, ProcessQueueManager, QueueKey, QueueKeyManager, SinkQueueManager,
};

/// Capability bundle handed to pipelines at construction. These are the
/// runtime-wide collaborators (owned by the composition root, not process
/// globals) that pipelines and plugins are allowed to touch.
#[derive(Clone)]
pub struct RuntimeServices {
    pub key_manager: Arc<QueueKeyManager>,
    pub process_queues: Arc<ProcessQueueManager>,
    pub sink_queues: Arc<SinkQueueManager>,
    pub flush_manager: Arc<TimeoutFlushManager>,
    pub feedbacks: Arc<FeedbackRegistry>,
    pub alarm: AlarmSender,
}

/// Read-only-after-Init bag of per-pipeline facts.
///
/// Plugins hold an `Arc` to this instead of a pointer back to the pipeline;
/// everything they may need from the pipeline is reachable through accessors
/// or the [`RuntimeServices`] handles.
pub struct PipelineContext {
    name: String,
    create_time: DateTime<Utc>,
    project: String,
    logstore: String,
    region: String,
    global: GlobalConfig,
    process_queue_key: OnceLock<QueueKey>,
    services: RuntimeServices,
}

impl PipelineContext {
    pub fn new(config: &PipelineConfig, services: RuntimeServices) -> Self {
        Self {
            name: config.name.clone(),
            create_time: Utc
                .timestamp_opt(config.create_time, 0)
                .single()
                .unwrap_or(DateTime::UNIX_EPOCH),
            project: config.project.clone(),
            logstore: config.logstore.clone(),
            region: config.region.clone(),
            global: config.global.clone().unwrap_or_default(),
            process_queue_key: OnceLock::new(),
            services,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn logstore(&self) -> &str {
        &self.logstore
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn services(&self) -> &RuntimeServices {
        &self.services
    }

    pub fn process_queue_key(&self) -> Option<QueueKey> {
        self.process_queue_key.get().copied()
    }

    pub(crate) fn set_process_queue_key(&self, key: QueueKey) {
        let _unused = self.process_queue_key.set(key);
    }

    /// Emits an alarm tagged with this pipeline's identity.
    pub fn alarm(&self, kind: AlarmKind, message: impl Into<String>) {
        self.services.alarm.send(Alarm {
            kind,
            message: message.into(),
            project: self.project.clone(),
            logstore: self.logstore.clone(),
            region: self.region.clone(),
        });
    }

    /// Rate-limited variant of [`alarm`](Self::alarm) for per-record failure
    /// paths.
    pub fn alarm_rate_limited(&self, kind: AlarmKind, message: impl Into<String>) {
        self.services.alarm.send_rate_limited(Alarm {
            kind,
            message: message.into(),
            project: self.project.clone(),
            logstore: self.logstore.clone(),
            region: self.region.clone(),
        });
    }
}
