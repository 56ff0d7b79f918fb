//! File-tailing input.
//!
//! The actual tailer (discovery, rotation, checkpoints) is an external
//! collaborator; this plugin carries the declarative surface the runtime
//! assembles and validates against: ack capability, exactly-once settings,
//! and the read throttle that process-queue feedback releases.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::monitor::MetricsRecord;
use crate::plugin::Input;
use crate::queue::{Feedback, QueueKey};

/// Read throttle shared between the tailer and the process queue: pushes
/// that hit backpressure raise it, queue feedback releases it.
#[derive(Debug, Default)]
pub struct FileReadThrottle {
    throttled: AtomicBool,
}

impl FileReadThrottle {
    pub fn throttle(&self) {
        self.throttled.store(true, Ordering::Release);
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled.load(Ordering::Acquire)
    }
}

impl Feedback for FileReadThrottle {
    fn feedback(&self, key: QueueKey) {
        debug!("process queue {} drained, resuming file reads", key);
        self.throttled.store(false, Ordering::Release);
    }
}

#[derive(Debug, Deserialize)]
struct FileInputParams {
    #[serde(rename = "FilePaths")]
    file_paths: Vec<String>,
    #[serde(rename = "ExactlyOnceConcurrency", default)]
    exactly_once_concurrency: u32,
}

/// The file-tailing input plugin.
#[derive(Default)]
pub struct FileInput {
    file_paths: Vec<String>,
    exactly_once_concurrency: u32,
    ctx: Option<Arc<PipelineContext>>,
    started: AtomicBool,
}

impl FileInput {
    pub const NAME: &'static str = "input_file";

    pub fn file_paths(&self) -> &[String] {
        &self.file_paths
    }
}

impl Input for FileInput {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn init(
        &mut self,
        detail: &Value,
        ctx: &Arc<PipelineContext>,
        _input_index: usize,
        _metrics: MetricsRecord,
    ) -> PipelineResult<Option<Value>> {
        let params: FileInputParams = serde_json::from_value(detail.clone())
            .map_err(|e| PipelineError::plugin_init(Self::NAME, e.to_string()))?;
        if params.file_paths.is_empty() {
            return Err(PipelineError::plugin_init(Self::NAME, "FilePaths is empty"));
        }
        self.file_paths = params.file_paths;
        self.exactly_once_concurrency = params.exactly_once_concurrency;
        self.ctx = Some(ctx.clone());
        Ok(None)
    }

    fn start(&self) -> PipelineResult<()> {
        self.started.store(true, Ordering::SeqCst);
        if let Some(ctx) = &self.ctx {
            info!(
                "file input started, config: {}, paths: {:?}",
                ctx.name(),
                self.file_paths
            );
        }
        Ok(())
    }

    fn stop(&self, is_removing: bool) -> PipelineResult<()> {
        self.started.store(false, Ordering::SeqCst);
        if let Some(ctx) = &self.ctx {
            info!(
                "file input stopped, config: {}, removing: {}",
                ctx.name(),
                is_removing
            );
        }
        Ok(())
    }

    fn support_ack(&self) -> bool {
        true
    }

    fn exactly_once_concurrency(&self) -> u32 {
        self.exactly_once_concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use serde_json::json;

    #[test]
    fn test_init_parses_params() {
        let ctx = test_context("files");
        let mut input = FileInput::default();
        let fragment = input
            .init(
                &json!({"FilePaths": ["/var/log/*.log"], "ExactlyOnceConcurrency": 4}),
                &ctx,
                0,
                MetricsRecord::new(),
            )
            .unwrap();
        assert!(fragment.is_none());
        assert_eq!(input.file_paths(), ["/var/log/*.log"]);
        assert_eq!(input.exactly_once_concurrency(), 4);
        assert!(input.support_ack());
    }

    #[test]
    fn test_init_requires_file_paths() {
        let ctx = test_context("files");
        let mut input = FileInput::default();
        assert!(input
            .init(&json!({"FilePaths": []}), &ctx, 0, MetricsRecord::new())
            .is_err());
        assert!(input
            .init(&json!({}), &ctx, 0, MetricsRecord::new())
            .is_err());
    }

    #[test]
    fn test_throttle_released_by_feedback() {
        let throttle = FileReadThrottle::default();
        throttle.throttle();
        assert!(throttle.is_throttled());
        throttle.feedback(QueueKey(1));
        assert!(!throttle.is_throttled());
    }
}
