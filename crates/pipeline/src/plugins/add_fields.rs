//! Static field injection.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use telemetry_types::{Event, EventGroup};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::monitor::MetricsRecord;
use crate::plugin::Processor;

#[derive(Debug, Deserialize)]
struct AddFieldsParams {
    #[serde(rename = "Fields")]
    fields: BTreeMap<String, String>,
    #[serde(rename = "IgnoreIfExist", default)]
    ignore_if_exist: bool,
}

/// Adds a fixed set of fields to every log event.
#[derive(Default)]
pub struct AddFieldsProcessor {
    fields: Vec<(Bytes, Bytes)>,
    ignore_if_exist: bool,
}

impl AddFieldsProcessor {
    pub const NAME: &'static str = "processor_add_fields";
}

impl Processor for AddFieldsProcessor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn init(
        &mut self,
        detail: &Value,
        _ctx: &Arc<PipelineContext>,
        _metrics: MetricsRecord,
    ) -> PipelineResult<()> {
        let params: AddFieldsParams = serde_json::from_value(detail.clone())
            .map_err(|e| PipelineError::plugin_init(Self::NAME, e.to_string()))?;
        if params.fields.is_empty() {
            return Err(PipelineError::plugin_init(Self::NAME, "Fields is empty"));
        }
        self.fields = params
            .fields
            .into_iter()
            .map(|(k, v)| (Bytes::from(k), Bytes::from(v)))
            .collect();
        self.ignore_if_exist = params.ignore_if_exist;
        Ok(())
    }

    fn process(&self, groups: &mut Vec<EventGroup>) {
        for group in groups {
            for event in group.events_mut() {
                let Event::Log(log) = event else { continue };
                for (key, value) in &self.fields {
                    if self.ignore_if_exist && log.has_content(key) {
                        continue;
                    }
                    log.set_content_no_copy(key.clone(), value.clone());
                }
            }
        }
    }
}
