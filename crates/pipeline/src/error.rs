//! Error types for the pipeline runtime

use thiserror::Error;

use crate::queue::QueueKey;

/// Pipeline-specific error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid pipeline config: {message}")]
    InvalidConfig { message: String },

    #[error("plugin '{plugin}' init failed: {message}")]
    PluginInit { plugin: String, message: String },

    #[error("duplicate plugin registration: {kind}/{name}")]
    DuplicateRegistration { kind: &'static str, name: String },

    #[error("queue not found for key {0}")]
    QueueNotFound(QueueKey),

    #[error("sink queue already exists for key {0}")]
    SinkQueueExists(QueueKey),

    #[error("extended runtime rejected pipeline '{id}'")]
    ExtendedLoad { id: String },

    #[error("pipeline '{name}' not found")]
    PipelineNotFound { name: String },

    #[error("pipeline '{name}' is still stopping")]
    StopPending { name: String },

    #[error("send to sink '{sink}' failed: {message}")]
    SendFailed { sink: String, message: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        PipelineError::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn plugin_init(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::PluginInit {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
