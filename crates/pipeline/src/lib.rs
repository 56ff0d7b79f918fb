//! Telemetry pipeline runtime
//!
//! The core of the collection agent: assembles pipelines from declarative
//! configuration, multiplexes ingress across inputs and egress across sinks,
//! and coordinates backpressure between stages through bounded intermediary
//! queues. Plugins without a native implementation are delegated to an
//! external extended runtime so mixed configurations execute as one logical
//! flow.

pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod extended;
pub mod instance;
pub mod monitor;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
pub mod queue;
pub mod registry;
pub mod router;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use batch::TimeoutFlushManager;
pub use config::{GlobalConfig, PipelineConfig, PluginConfig};
pub use context::{PipelineContext, RuntimeServices};
pub use error::{PipelineError, PipelineResult};
pub use extended::{ExtendedPipeline, ExtendedRuntime, NoopExtendedRuntime};
pub use instance::{InputInstance, ProcessorInstance, SinkInstance};
pub use monitor::{Alarm, AlarmKind, AlarmSender, Counter, MetricsRecord};
pub use pipeline::Pipeline;
pub use plugin::{Input, PluginMeta, Processor, Sink};
pub use queue::{
    Feedback, FeedbackRegistry, ProcessQueueItem, ProcessQueueManager, PushResult, QueueKey,
    QueueKeyManager, SinkQueue, SinkQueueManager, SinkQueueParams, SinkRequest, SinkTransport,
    MAX_PRIORITY,
};
pub use registry::PluginRegistry;
pub use router::{MatcherConfig, RouteConfig, Router};
pub use runtime::{Runtime, RuntimeOptions};
