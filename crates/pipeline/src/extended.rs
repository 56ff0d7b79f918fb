//! Extended sub-pipelines.
//!
//! Plugins with no native implementation are serialized into one of two
//! sub-pipelines and handed to an external runtime: "with-input" when the
//! delegated plugins include the head of the flow, "without-input" when
//! native stages feed processed groups onward. The external runtime is an
//! opaque loader behind the [`ExtendedRuntime`] trait.

use serde_json::{Map, Value};
use tracing::info;

use crate::config::PluginConfig;

/// Id suffix of the with-input sub-pipeline.
pub const WITH_INPUT_SUFFIX: &str = "/1";
/// Id suffix of the without-input sub-pipeline.
pub const WITHOUT_INPUT_SUFFIX: &str = "/2";

/// Loader ABI of the external runtime.
pub trait ExtendedRuntime: Send + Sync {
    fn load_pipeline(
        &self,
        id: &str,
        pipeline: &Value,
        project: &str,
        logstore: &str,
        region: &str,
        logstore_key: u64,
    ) -> bool;

    fn unload_pipeline(&self, id: &str) -> bool;
}

/// An extended runtime that accepts everything. Stands in when the agent
/// runs without the external runtime linked in.
pub struct NoopExtendedRuntime;

impl ExtendedRuntime for NoopExtendedRuntime {
    fn load_pipeline(
        &self,
        id: &str,
        _pipeline: &Value,
        _project: &str,
        _logstore: &str,
        _region: &str,
        _logstore_key: u64,
    ) -> bool {
        info!("extended runtime unavailable, accepting pipeline '{}' as no-op", id);
        true
    }

    fn unload_pipeline(&self, _id: &str) -> bool {
        true
    }
}

/// A sub-pipeline under construction: a generic tree that plugins and global
/// parameters are appended to before serialization.
#[derive(Debug, Clone, Default)]
pub struct ExtendedPipeline {
    root: Value,
}

impl ExtendedPipeline {
    pub fn new() -> Self {
        Self { root: Value::Null }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    fn root_map(&mut self) -> &mut Map<String, Value> {
        if self.root.is_null() {
            self.root = Value::Object(Map::new());
        }
        self.root.as_object_mut().expect("extended pipeline root is an object")
    }

    /// Appends a delegated plugin entry to the given module list as
    /// `{type, detail}`.
    pub fn add_plugin(&mut self, module: &str, plugin: &PluginConfig) {
        let entry = serde_json::json!({
            "type": plugin.plugin_type,
            "detail": plugin.detail,
        });
        let root = self.root_map();
        match root.get_mut(module) {
            Some(Value::Array(list)) => list.push(entry),
            _ => {
                root.insert(module.to_string(), Value::Array(vec![entry]));
            }
        }
    }

    /// Merges a fragment produced by a native plugin: arrays append, objects
    /// overwrite key by key.
    pub fn merge(&mut self, fragment: &Value) {
        if fragment.is_null() {
            return;
        }
        merge_tree(self.root_map(), fragment);
    }

    /// Sets one key in the sub-pipeline's `global` block.
    pub fn set_global_param(&mut self, key: &str, value: Value) {
        let root = self.root_map();
        match root.get_mut("global") {
            Some(Value::Object(global)) => {
                global.insert(key.to_string(), value);
            }
            _ => {
                let mut global = Map::new();
                global.insert(key.to_string(), value);
                root.insert("global".to_string(), Value::Object(global));
            }
        }
    }
}

/// Pure merge over generic trees: for every top-level key of `src`, arrays
/// append onto `dst`'s array and objects overwrite `dst`'s entries key by
/// key. Scalar keys are overwritten.
pub fn merge_tree(dst: &mut Map<String, Value>, src: &Value) {
    let Some(src) = src.as_object() else {
        return;
    };
    for (key, value) in src {
        match value {
            Value::Array(items) => match dst.get_mut(key) {
                Some(Value::Array(existing)) => existing.extend(items.iter().cloned()),
                _ => {
                    dst.insert(key.clone(), Value::Array(items.clone()));
                }
            },
            Value::Object(fields) => match dst.get_mut(key) {
                Some(Value::Object(existing)) => {
                    for (k, v) in fields {
                        existing.insert(k.clone(), v.clone());
                    }
                }
                _ => {
                    dst.insert(key.clone(), Value::Object(fields.clone()));
                }
            },
            other => {
                dst.insert(key.clone(), other.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plugin(plugin_type: &str, detail: Value) -> PluginConfig {
        PluginConfig {
            plugin_type: plugin_type.to_string(),
            detail,
        }
    }

    #[test]
    fn test_add_plugin_splits_type_and_detail() {
        let mut sub = ExtendedPipeline::new();
        assert!(sub.is_empty());
        sub.add_plugin("inputs", &plugin("service_docker", json!({"Stdout": true})));
        sub.add_plugin("inputs", &plugin("service_syslog", json!({})));

        assert_eq!(
            sub.as_value()["inputs"],
            json!([
                {"type": "service_docker", "detail": {"Stdout": true}},
                {"type": "service_syslog", "detail": {}},
            ])
        );
    }

    #[test]
    fn test_merge_appends_arrays_and_overwrites_objects() {
        let mut sub = ExtendedPipeline::new();
        sub.merge(&json!({
            "processors": [{"type": "a"}],
            "global": {"x": 1, "y": 1},
        }));
        sub.merge(&json!({
            "processors": [{"type": "b"}],
            "global": {"y": 2, "z": 3},
        }));

        assert_eq!(
            sub.as_value()["processors"],
            json!([{"type": "a"}, {"type": "b"}])
        );
        assert_eq!(sub.as_value()["global"], json!({"x": 1, "y": 2, "z": 3}));
    }

    #[test]
    fn test_merge_null_is_noop() {
        let mut sub = ExtendedPipeline::new();
        sub.merge(&Value::Null);
        assert!(sub.is_empty());
    }

    #[test]
    fn test_set_global_param() {
        let mut sub = ExtendedPipeline::new();
        sub.set_global_param("DefaultLogQueueSize", json!(10));
        sub.set_global_param("EnableTimestampNanosecond", json!(true));
        assert_eq!(
            sub.as_value()["global"],
            json!({"DefaultLogQueueSize": 10, "EnableTimestampNanosecond": true})
        );
    }
}
