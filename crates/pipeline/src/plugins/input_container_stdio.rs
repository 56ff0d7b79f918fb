//! Container stdout/stderr input.
//!
//! Container runtimes stream stdio without replay, so this input cannot
//! honor acknowledgements; pipelines fed by it get a circular process queue.
//! The runtime-facing collection loop is an external collaborator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::monitor::MetricsRecord;
use crate::plugin::Input;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ContainerStdioParams {
    #[serde(rename = "IgnoringStdout")]
    ignoring_stdout: bool,
    #[serde(rename = "IgnoringStderr")]
    ignoring_stderr: bool,
}

impl Default for ContainerStdioParams {
    fn default() -> Self {
        Self {
            ignoring_stdout: false,
            ignoring_stderr: true,
        }
    }
}

/// Input collecting container stdout/stderr streams.
#[derive(Default)]
pub struct ContainerStdioInput {
    ignoring_stdout: bool,
    ignoring_stderr: bool,
    ctx: Option<Arc<PipelineContext>>,
    started: AtomicBool,
}

impl ContainerStdioInput {
    pub const NAME: &'static str = "input_container_stdio";
}

impl Input for ContainerStdioInput {
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
        let params: ContainerStdioParams = serde_json::from_value(detail.clone())
            .map_err(|e| PipelineError::plugin_init(Self::NAME, e.to_string()))?;
        if params.ignoring_stdout && params.ignoring_stderr {
            return Err(PipelineError::plugin_init(
                Self::NAME,
                "both stdout and stderr are ignored",
            ));
        }
        self.ignoring_stdout = params.ignoring_stdout;
        self.ignoring_stderr = params.ignoring_stderr;
        self.ctx = Some(ctx.clone());
        Ok(None)
    }

    fn start(&self) -> PipelineResult<()> {
        self.started.store(true, Ordering::SeqCst);
        if let Some(ctx) = &self.ctx {
            info!("container stdio input started, config: {}", ctx.name());
        }
        Ok(())
    }

    fn stop(&self, _is_removing: bool) -> PipelineResult<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn support_ack(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use serde_json::json;

    #[test]
    fn test_defaults_collect_stdout_only() {
        let ctx = test_context("stdio");
        let mut input = ContainerStdioInput::default();
        input
            .init(&json!({}), &ctx, 0, MetricsRecord::new())
            .unwrap();
        assert!(!input.ignoring_stdout);
        assert!(input.ignoring_stderr);
        assert!(!input.support_ack());
    }

    #[test]
    fn test_rejects_ignoring_both_streams() {
        let ctx = test_context("stdio");
        let mut input = ContainerStdioInput::default();
        let result = input.init(
            &json!({"IgnoringStdout": true, "IgnoringStderr": true}),
            &ctx,
            0,
            MetricsRecord::new(),
        );
        assert!(result.is_err());
    }
}
