//! Pipeline configuration data structures.
//!
//! The runtime consumes an already-parsed tree; loading YAML/JSON files from
//! disk is the caller's concern. Plugin entries keep their detail opaque so
//! unknown types can be forwarded verbatim to the extended runtime.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{PipelineError, PipelineResult};

/// One plugin entry: a `Type` discriminator plus an opaque detail object.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    #[serde(rename = "Type")]
    pub plugin_type: String,
    #[serde(flatten)]
    pub detail: Value,
}

/// Pipeline-wide options from the `global` block. Keys the native runtime
/// does not know are collected and forwarded to extended sub-pipelines.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    #[serde(rename = "EnableTimestampNanosecond")]
    pub enable_timestamp_nanosecond: bool,
    #[serde(rename = "UsingOldContentTag")]
    pub using_old_content_tag: bool,
    /// 1-based process queue priority; 0 means unset (lowest priority).
    #[serde(rename = "ProcessPriority")]
    pub process_priority: u32,
    #[serde(rename = "Topic")]
    pub topic: String,
    #[serde(flatten)]
    pub extended_params: serde_json::Map<String, Value>,
}

/// A validated pipeline configuration tree.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(rename = "createTime", default)]
    pub create_time: i64,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub logstore: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub global: Option<GlobalConfig>,
    #[serde(default)]
    pub inputs: Vec<PluginConfig>,
    #[serde(default)]
    pub processors: Vec<PluginConfig>,
    #[serde(default)]
    pub aggregators: Vec<PluginConfig>,
    #[serde(rename = "flushers", alias = "sinks", default)]
    pub sinks: Vec<PluginConfig>,
    #[serde(default)]
    pub extensions: Vec<PluginConfig>,
    #[serde(default)]
    pub router: Option<Vec<crate::router::RouteConfig>>,
}

impl PipelineConfig {
    /// Parses and validates a configuration tree.
    pub fn from_value(value: Value) -> PipelineResult<Self> {
        let config: PipelineConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.name.is_empty() {
            return Err(PipelineError::invalid_config("pipeline name is empty"));
        }
        if self.inputs.is_empty() {
            return Err(PipelineError::invalid_config(format!(
                "pipeline '{}' has no inputs",
                self.name
            )));
        }
        if self.sinks.is_empty() {
            return Err(PipelineError::invalid_config(format!(
                "pipeline '{}' has no sinks",
                self.name
            )));
        }
        for plugin in self
            .inputs
            .iter()
            .chain(&self.processors)
            .chain(&self.aggregators)
            .chain(&self.sinks)
            .chain(&self.extensions)
        {
            if plugin.plugin_type.is_empty() {
                return Err(PipelineError::invalid_config(format!(
                    "pipeline '{}' has a plugin entry without a Type",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_pipeline_config() {
        let value = json!({
            "name": "access-logs",
            "createTime": 1700000000,
            "project": "web",
            "logstore": "nginx",
            "region": "eu-west-1",
            "global": {
                "EnableTimestampNanosecond": true,
                "ProcessPriority": 1,
                "DefaultLogQueueSize": 512
            },
            "inputs": [
                {"Type": "input_file", "FilePaths": ["/var/log/nginx/access.log"]}
            ],
            "processors": [
                {"Type": "processor_parse_delimiter", "SourceKey": "content",
                 "Separator": ",", "Keys": ["time", "method"]}
            ],
            "flushers": [
                {"Type": "sink_remote_store"}
            ]
        });

        let config = PipelineConfig::from_value(value).unwrap();
        assert_eq!(config.name, "access-logs");
        assert_eq!(config.create_time, 1700000000);
        assert_eq!(config.inputs.len(), 1);
        assert_eq!(config.inputs[0].plugin_type, "input_file");
        assert_eq!(
            config.inputs[0].detail["FilePaths"][0],
            json!("/var/log/nginx/access.log")
        );
        assert_eq!(config.sinks.len(), 1);

        let global = config.global.unwrap();
        assert!(global.enable_timestamp_nanosecond);
        assert_eq!(global.process_priority, 1);
        // Unknown keys are kept for the extended runtime.
        assert_eq!(global.extended_params["DefaultLogQueueSize"], json!(512));
    }

    #[test]
    fn test_sinks_alias_accepted() {
        let value = json!({
            "name": "p",
            "inputs": [{"Type": "input_file", "FilePaths": ["/tmp/a.log"]}],
            "sinks": [{"Type": "sink_blackhole"}]
        });
        let config = PipelineConfig::from_value(value).unwrap();
        assert_eq!(config.sinks.len(), 1);
    }

    #[test]
    fn test_validation_rejects_missing_pieces() {
        assert!(PipelineConfig::from_value(json!({
            "name": "", "inputs": [{"Type": "input_file"}], "flushers": [{"Type": "x"}]
        }))
        .is_err());
        assert!(PipelineConfig::from_value(json!({
            "name": "p", "flushers": [{"Type": "x"}]
        }))
        .is_err());
        assert!(PipelineConfig::from_value(json!({
            "name": "p", "inputs": [{"Type": "input_file"}]
        }))
        .is_err());
    }
}
