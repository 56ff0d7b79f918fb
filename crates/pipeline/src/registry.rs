//! Plugin registry mapping type names to factories.

use std::collections::HashMap;

use crate::error::{PipelineError, PipelineResult};
use crate::instance::{InputInstance, ProcessorInstance, SinkInstance};
use crate::plugin::{Input, PluginMeta, Processor, Sink};

/// A factory for input plugin instances.
pub trait InputFactory: Send + Sync {
    fn create(&self) -> Box<dyn Input>;
}

impl<F> InputFactory for F
where
    F: Fn() -> Box<dyn Input> + Send + Sync,
{
    fn create(&self) -> Box<dyn Input> {
        self()
    }
}

/// A factory for processor plugin instances.
pub trait ProcessorFactory: Send + Sync {
    fn create(&self) -> Box<dyn Processor>;
}

impl<F> ProcessorFactory for F
where
    F: Fn() -> Box<dyn Processor> + Send + Sync,
{
    fn create(&self) -> Box<dyn Processor> {
        self()
    }
}

/// A factory for sink plugin instances.
pub trait SinkFactory: Send + Sync {
    fn create(&self) -> Box<dyn Sink>;
}

impl<F> SinkFactory for F
where
    F: Fn() -> Box<dyn Sink> + Send + Sync,
{
    fn create(&self) -> Box<dyn Sink> {
        self()
    }
}

/// Directory of native plugin factories, keyed by `(kind, type name)`.
///
/// `create_*` returns `None` for unknown names; the caller falls back to
/// delegating the plugin to the extended runtime. Registering the same name
/// twice is a fatal configuration error surfaced at composition time.
#[derive(Default)]
pub struct PluginRegistry {
    inputs: HashMap<String, Box<dyn InputFactory>>,
    processors: HashMap<String, Box<dyn ProcessorFactory>>,
    sinks: HashMap<String, Box<dyn SinkFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_input(
        &mut self,
        name: &str,
        factory: impl InputFactory + 'static,
    ) -> PipelineResult<()> {
        if self.inputs.contains_key(name) {
            return Err(PipelineError::DuplicateRegistration {
                kind: "input",
                name: name.to_string(),
            });
        }
        self.inputs.insert(name.to_string(), Box::new(factory));
        Ok(())
    }

    pub fn register_processor(
        &mut self,
        name: &str,
        factory: impl ProcessorFactory + 'static,
    ) -> PipelineResult<()> {
        if self.processors.contains_key(name) {
            return Err(PipelineError::DuplicateRegistration {
                kind: "processor",
                name: name.to_string(),
            });
        }
        self.processors.insert(name.to_string(), Box::new(factory));
        Ok(())
    }

    pub fn register_sink(
        &mut self,
        name: &str,
        factory: impl SinkFactory + 'static,
    ) -> PipelineResult<()> {
        if self.sinks.contains_key(name) {
            return Err(PipelineError::DuplicateRegistration {
                kind: "sink",
                name: name.to_string(),
            });
        }
        self.sinks.insert(name.to_string(), Box::new(factory));
        Ok(())
    }

    pub fn create_input(&self, name: &str, meta: PluginMeta) -> Option<InputInstance> {
        self.inputs
            .get(name)
            .map(|factory| InputInstance::new(factory.create(), meta))
    }

    pub fn create_processor(&self, name: &str, meta: PluginMeta) -> Option<ProcessorInstance> {
        self.processors
            .get(name)
            .map(|factory| ProcessorInstance::new(factory.create(), meta))
    }

    pub fn create_sink(&self, name: &str, meta: PluginMeta) -> Option<SinkInstance> {
        self.sinks
            .get(name)
            .map(|factory| SinkInstance::new(factory.create(), meta))
    }
}
