//! Built-in native plugins

pub mod add_fields;
pub mod input_container_stdio;
pub mod input_file;
pub mod parse_delimiter;
pub mod parser_options;
pub mod sink_blackhole;
pub mod sink_remote_store;

pub use add_fields::AddFieldsProcessor;
pub use input_container_stdio::ContainerStdioInput;
pub use input_file::{FileInput, FileReadThrottle};
pub use parse_delimiter::DelimiterParseProcessor;
pub use parser_options::{CommonParserOptions, UNMATCH_LOG_KEY};
pub use sink_blackhole::BlackholeSink;
pub use sink_remote_store::{LoggingTransport, RemoteStoreSink};

use std::sync::Arc;

use crate::error::PipelineResult;
use crate::plugin::{Input, Processor, Sink};
use crate::queue::{FeedbackRegistry, SinkTransport};
use crate::registry::PluginRegistry;

/// Registers all built-in plugins and their feedback interfaces.
///
/// `remote_transport` is the wire side of the remote-store sink, injected by
/// the composition root (a real client in production, a recording stub in
/// tests).
pub fn register_builtin_plugins(
    registry: &mut PluginRegistry,
    feedbacks: &FeedbackRegistry,
    remote_transport: Arc<dyn SinkTransport>,
) -> PipelineResult<()> {
    registry.register_input(FileInput::NAME, || {
        Box::new(FileInput::default()) as Box<dyn Input>
    })?;
    feedbacks.register(FileInput::NAME, Arc::new(FileReadThrottle::default()));

    registry.register_input(ContainerStdioInput::NAME, || {
        Box::new(ContainerStdioInput::default()) as Box<dyn Input>
    })?;

    registry.register_processor(DelimiterParseProcessor::NAME, || {
        Box::new(DelimiterParseProcessor::default()) as Box<dyn Processor>
    })?;
    registry.register_processor(AddFieldsProcessor::NAME, || {
        Box::new(AddFieldsProcessor::default()) as Box<dyn Processor>
    })?;

    registry.register_sink(RemoteStoreSink::NAME, move || {
        Box::new(RemoteStoreSink::new(remote_transport.clone())) as Box<dyn Sink>
    })?;
    registry.register_sink(BlackholeSink::NAME, || {
        Box::new(BlackholeSink::default()) as Box<dyn Sink>
    })?;
    Ok(())
}
