//! Shared helpers for unit tests.

use std::sync::{Arc, Mutex};

use serde_json::json;
use telemetry_types::EventGroup;

use crate::batch::TimeoutFlushManager;
use crate::config::PipelineConfig;
use crate::context::{PipelineContext, RuntimeServices};
use crate::monitor::{Alarm, AlarmSender};
use crate::queue::{
    FeedbackRegistry, ProcessQueueManager, QueueKeyManager, SinkQueueManager, SinkRequest,
    SinkTransport,
};

/// Surfaces `tracing` output when tests run with `--nocapture`. Safe to call
/// from every test; only the first call installs the subscriber.
pub(crate) fn init_test_logging() {
    let _unused = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub(crate) fn test_services() -> (RuntimeServices, flume::Receiver<Alarm>) {
    init_test_logging();
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
    (services, alarm_rx)
}

pub(crate) fn test_context(name: &str) -> Arc<PipelineContext> {
    let (services, _alarm_rx) = test_services();
    let config = PipelineConfig::from_value(json!({
        "name": name,
        "inputs": [{"Type": "input_file", "FilePaths": ["/tmp/test.log"]}],
        "flushers": [{"Type": "sink_blackhole"}],
    }))
    .unwrap();
    Arc::new(PipelineContext::new(&config, services))
}

/// Transport that remembers every delivered batch.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    pub delivered: Mutex<Vec<Vec<EventGroup>>>,
}

impl SinkTransport for RecordingTransport {
    fn deliver(&self, request: &SinkRequest) -> bool {
        // Requests are borrowed by the queue layer; keep copies.
        let groups: Vec<EventGroup> = request.groups.iter().map(EventGroup::copy).collect();
        self.delivered.lock().unwrap().push(groups);
        true
    }
}
