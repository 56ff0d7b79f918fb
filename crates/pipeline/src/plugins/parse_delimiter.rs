//! Delimiter (CSV-style) log parsing.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;
use serde_json::Value;
use telemetry_types::{Event, EventGroup, GroupMetaKey, LogEvent};
use tracing::warn;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::monitor::{
    AlarmKind, Counter, MetricsRecord, METRIC_DISCARD_RECORDS_TOTAL, METRIC_IN_SIZE_BYTES,
    METRIC_OUT_SIZE_BYTES, METRIC_PARSE_ERROR_TOTAL,
};
use crate::plugin::Processor;
use crate::plugins::parser_options::{CommonParserOptions, UNMATCH_LOG_KEY};

/// Key assigned to fields that should be dropped in `discard` mode.
const DISCARDED_FIELD_KEY: &str = "_";

/// How columns beyond the configured keys are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum OverflowedFieldsTreatment {
    /// Extra columns become `__columnN__` fields.
    #[default]
    Extend,
    /// The unsplit remainder becomes a single `__columnN__` field.
    Keep,
    /// Extra columns and `_`-keyed columns are dropped.
    Discard,
}

#[derive(Debug, Deserialize)]
struct DelimiterParseParams {
    #[serde(rename = "SourceKey")]
    source_key: String,
    #[serde(rename = "Separator")]
    separator: String,
    #[serde(rename = "Quote", default)]
    quote: Option<String>,
    #[serde(rename = "Keys")]
    keys: Vec<String>,
    #[serde(rename = "AllowingShortenedFields", default)]
    allowing_shortened_fields: bool,
    #[serde(rename = "OverflowedFieldsTreatment", default)]
    overflowed_fields_treatment: Option<String>,
    #[serde(flatten)]
    options: CommonParserOptions,
}

/// Splits a source field on a separator into the configured keys.
///
/// Single-character separators may carry a quote character; quoted fields
/// support doubled-quote escapes. Parse failures are counted, alarmed with
/// rate limiting, and handled per the common parser options.
#[derive(Default)]
pub struct DelimiterParseProcessor {
    source_key: Bytes,
    separator: Vec<u8>,
    separator_char: u8,
    quote: u8,
    keys: Vec<Bytes>,
    allowing_shortened_fields: bool,
    overflow: OverflowedFieldsTreatment,
    options: CommonParserOptions,
    renamed_source_key: Bytes,
    source_key_overwritten: bool,
    raw_log_tag_overwritten: bool,
    ctx: Option<Arc<PipelineContext>>,
    in_size_bytes: Counter,
    out_size_bytes: Counter,
    discard_records_total: Counter,
    parse_error_total: Counter,
}

impl DelimiterParseProcessor {
    pub const NAME: &'static str = "processor_parse_delimiter";

    fn auto_extend(&self) -> bool {
        self.overflow == OverflowedFieldsTreatment::Extend
    }

    fn extract_partial(&self) -> bool {
        self.overflow == OverflowedFieldsTreatment::Discard
    }

    fn parse_failure(&self, message: &str, log_path: &[u8]) {
        if let Some(ctx) = &self.ctx {
            warn!(
                "parse delimiter log failed: {}, config: {}, file: {}",
                message,
                ctx.name(),
                String::from_utf8_lossy(log_path)
            );
            ctx.alarm_rate_limited(AlarmKind::ParseFailure, message.to_string());
        }
        self.parse_error_total.inc();
    }

    fn add_log(&self, log: &mut LogEvent, key: Bytes, value: Bytes) {
        self.out_size_bytes.add((key.len() + value.len()) as u64);
        log.set_content_no_copy(key, value);
    }

    /// Parses one log event in place; returns false when the event should be
    /// dropped from the group.
    fn process_event(&self, log: &mut LogEvent, log_path: &[u8]) -> bool {
        let Some(buffer) = log.content(&self.source_key).cloned() else {
            return true;
        };
        self.in_size_bytes.add(buffer.len() as u64);

        let data = buffer.as_ref();
        let mut end = data.len();
        while end > 0 && (data[end - 1] == b' ' || data[end - 1] == b'\r') {
            end -= 1;
        }
        let mut beg = 0;
        while beg < end && data[beg] == b' ' {
            beg += 1;
        }
        if beg >= end {
            return true;
        }

        let use_quote = self.separator.len() == 1 && self.quote != self.separator_char;
        let columns = if use_quote {
            self.parse_quoted(&buffer, beg, end)
        } else {
            self.split_plain(&buffer, beg, end)
        };

        let mut parse_success = match &columns {
            Some(columns) => {
                if columns.is_empty()
                    || (!self.allowing_shortened_fields && columns.len() < self.keys.len())
                {
                    self.parse_failure(
                        &format!(
                            "keys count does not match column count, parsed: {}, required: {}",
                            columns.len(),
                            self.keys.len()
                        ),
                        log_path,
                    );
                    false
                } else {
                    true
                }
            }
            None => {
                self.parse_failure("malformed delimiter line", log_path);
                false
            }
        };
        let columns = columns.unwrap_or_default();
        if columns.is_empty() {
            parse_success = false;
        }

        if parse_success {
            for (idx, value) in columns.into_iter().enumerate() {
                if idx < self.keys.len() {
                    if self.extract_partial() && self.keys[idx].as_ref() == DISCARDED_FIELD_KEY.as_bytes()
                    {
                        continue;
                    }
                    self.add_log(log, self.keys[idx].clone(), value);
                } else {
                    if self.extract_partial() {
                        continue;
                    }
                    let key = Bytes::from(format!("__column{idx}__"));
                    self.add_log(log, key, value);
                }
            }
        } else if self.options.should_add_unmatch_log(false) {
            self.add_log(log, Bytes::from_static(UNMATCH_LOG_KEY.as_bytes()), buffer.clone());
        }

        if self.options.should_retain_event(parse_success) {
            if self.options.keeping_source_when_parse_succeed
                && (!parse_success || !self.raw_log_tag_overwritten)
            {
                self.add_log(log, self.renamed_source_key.clone(), buffer);
            }
            if parse_success && !self.source_key_overwritten {
                log.del_content(&self.source_key);
            }
            return true;
        }
        self.discard_records_total.inc();
        false
    }

    /// Quote-aware split: fields may be wrapped in the quote character, with
    /// doubled quotes as escapes. Returns `None` on a malformed line.
    fn parse_quoted(&self, buffer: &Bytes, beg: usize, end: usize) -> Option<Vec<Bytes>> {
        let data = buffer.as_ref();
        let quote = self.quote;
        let sep = self.separator_char;
        let mut fields = Vec::with_capacity(self.keys.len() + 1);
        let mut i = beg;
        loop {
            if i < end && data[i] == quote {
                // Quoted field: unescape into owned storage.
                let mut out = BytesMut::new();
                i += 1;
                let mut closed = false;
                while i < end {
                    let c = data[i];
                    if c == quote {
                        if i + 1 < end && data[i + 1] == quote {
                            out.put_u8(quote);
                            i += 2;
                        } else {
                            closed = true;
                            i += 1;
                            break;
                        }
                    } else {
                        out.put_u8(c);
                        i += 1;
                    }
                }
                if !closed {
                    return None;
                }
                fields.push(out.freeze());
                if i == end {
                    break;
                }
                if data[i] != sep {
                    // Trailing characters after the closing quote.
                    return None;
                }
                i += 1;
                if i == end {
                    fields.push(Bytes::new());
                    break;
                }
            } else {
                let start = i;
                while i < end && data[i] != sep && data[i] != quote {
                    i += 1;
                }
                if i < end && data[i] == quote {
                    // A quote inside an unquoted field.
                    return None;
                }
                fields.push(buffer.slice(start..i));
                if i == end {
                    break;
                }
                i += 1;
                if i == end {
                    fields.push(Bytes::new());
                    break;
                }
            }
        }

        if !self.auto_extend() && fields.len() > self.keys.len() {
            // Fold the overflow back into a single trailing field, separator
            // included, so no input bytes are lost.
            let extra_len: usize = fields[self.keys.len()..]
                .iter()
                .map(|f| 1 + f.len())
                .sum();
            let mut folded = BytesMut::with_capacity(extra_len);
            for field in &fields[self.keys.len()..] {
                folded.put_u8(sep);
                folded.extend_from_slice(field);
            }
            fields.truncate(self.keys.len());
            fields.push(folded.freeze());
        }
        Some(fields)
    }

    /// Plain split on a (possibly multi-character) separator. Stops early
    /// once the keys are filled unless overflow handling is `extend`,
    /// keeping the remainder as one column.
    fn split_plain(&self, buffer: &Bytes, beg: usize, end: usize) -> Option<Vec<Bytes>> {
        if end <= beg || self.separator.is_empty() || self.keys.is_empty() {
            return None;
        }
        let data = buffer.as_ref();
        let sep = self.separator.as_slice();
        if sep.len() > end - beg {
            return Some(vec![buffer.slice(beg..end)]);
        }
        let mut fields = Vec::with_capacity(self.keys.len() + 1);
        let mut pos = beg;
        let top = end - sep.len();
        while pos <= top {
            let found = data[pos..end]
                .windows(sep.len())
                .position(|window| window == sep)
                .map(|offset| pos + offset);
            let next = found.unwrap_or(end);
            fields.push(buffer.slice(pos..next));
            if next == end {
                return Some(fields);
            }
            pos = next + sep.len();
            if fields.len() >= self.keys.len() && !self.auto_extend() {
                // Remainder, separator included.
                fields.push(buffer.slice(next..end));
                return Some(fields);
            }
        }
        if pos <= end {
            fields.push(buffer.slice(pos..end));
        }
        Some(fields)
    }
}

impl Processor for DelimiterParseProcessor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn init(
        &mut self,
        detail: &Value,
        ctx: &Arc<PipelineContext>,
        metrics: MetricsRecord,
    ) -> PipelineResult<()> {
        let params: DelimiterParseParams = serde_json::from_value(detail.clone())
            .map_err(|e| PipelineError::plugin_init(Self::NAME, e.to_string()))?;

        let mut separator = params.separator;
        if separator == "\\t" {
            separator = "\t".to_string();
        }
        if separator.is_empty() || separator.len() > 3 {
            return Err(PipelineError::plugin_init(
                Self::NAME,
                "Separator length should be 1 to 3",
            ));
        }
        if params.keys.is_empty() {
            return Err(PipelineError::plugin_init(Self::NAME, "no column keys defined"));
        }

        self.quote = b'"';
        if separator.len() == 1 {
            if let Some(quote) = &params.quote {
                if quote.len() == 1 {
                    self.quote = quote.as_bytes()[0];
                } else {
                    return Err(PipelineError::plugin_init(
                        Self::NAME,
                        "Quote only supports a single character",
                    ));
                }
            }
        }

        self.overflow = match params.overflowed_fields_treatment.as_deref() {
            None | Some("extend") => OverflowedFieldsTreatment::Extend,
            Some("keep") => OverflowedFieldsTreatment::Keep,
            Some("discard") => OverflowedFieldsTreatment::Discard,
            Some(other) => {
                warn!(
                    "unknown OverflowedFieldsTreatment '{}', falling back to extend, config: {}",
                    other,
                    ctx.name()
                );
                OverflowedFieldsTreatment::Extend
            }
        };

        self.separator_char = separator.as_bytes()[0];
        self.separator = separator.into_bytes();
        self.source_key = Bytes::from(params.source_key);
        self.keys = params.keys.into_iter().map(Bytes::from).collect();
        self.allowing_shortened_fields = params.allowing_shortened_fields;
        self.options = params.options;
        self.renamed_source_key = Bytes::from(self.options.renamed_source_key.clone());

        self.source_key_overwritten = self.options.keeping_source_when_parse_succeed
            && self.renamed_source_key == self.source_key;
        for key in &self.keys {
            if key == &self.source_key {
                self.source_key_overwritten = true;
            }
            if key == &self.renamed_source_key {
                self.raw_log_tag_overwritten = true;
            }
        }

        self.in_size_bytes = metrics.counter(METRIC_IN_SIZE_BYTES);
        self.out_size_bytes = metrics.counter(METRIC_OUT_SIZE_BYTES);
        self.discard_records_total = metrics.counter(METRIC_DISCARD_RECORDS_TOTAL);
        self.parse_error_total = metrics.counter(METRIC_PARSE_ERROR_TOTAL);
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    fn process(&self, groups: &mut Vec<EventGroup>) {
        for group in groups {
            if group.is_empty() {
                continue;
            }
            let log_path = group
                .metadata(GroupMetaKey::LogFilePath)
                .cloned()
                .unwrap_or_default();
            group.events_mut().retain_mut(|event| match event {
                Event::Log(log) => self.process_event(log, log_path.as_ref()),
                _ => true,
            });
        }
    }
}
