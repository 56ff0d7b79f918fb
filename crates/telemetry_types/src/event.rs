//! Event types flowing through the pipeline.
//!
//! An event is one record: a log line, a metric sample, a trace span, or an
//! opaque raw payload. The variants are a tagged sum type rather than a class
//! hierarchy so processors can match on the kind they support and pass the
//! rest through untouched.

use bytes::Bytes;

/// Event timestamp: seconds since the Unix epoch plus optional nanoseconds.
///
/// Nanoseconds are only populated when the pipeline runs with nanosecond
/// timestamps enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: Option<u32>,
}

impl Timestamp {
    pub fn from_secs(secs: i64) -> Self {
        Self { secs, nanos: None }
    }

    pub fn with_nanos(secs: i64, nanos: u32) -> Self {
        Self {
            secs,
            nanos: Some(nanos),
        }
    }
}

/// The kind tag of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Log,
    Metric,
    Span,
    Raw,
}

/// A single log record: a timestamp and an ordered key/value content list.
///
/// Content order is insertion order; updating an existing key keeps its
/// position. Values are `Bytes` views, usually slices of the group's source
/// buffer.
#[derive(Debug, Default)]
pub struct LogEvent {
    pub timestamp: Timestamp,
    contents: Vec<(Bytes, Bytes)>,
}

impl LogEvent {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            contents: Vec::new(),
        }
    }

    pub fn has_content(&self, key: impl AsRef<[u8]>) -> bool {
        let key = key.as_ref();
        self.contents.iter().any(|(k, _)| k.as_ref() == key)
    }

    pub fn content(&self, key: impl AsRef<[u8]>) -> Option<&Bytes> {
        let key = key.as_ref();
        self.contents
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v)
    }

    /// Stores a content entry, copying both key and value into owned storage.
    pub fn set_content(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.set_content_no_copy(
            Bytes::copy_from_slice(key.as_ref()),
            Bytes::copy_from_slice(value.as_ref()),
        );
    }

    /// Stores a content entry without copying; the caller hands over its view.
    pub fn set_content_no_copy(&mut self, key: Bytes, value: Bytes) {
        if let Some(entry) = self
            .contents
            .iter_mut()
            .find(|(k, _)| k.as_ref() == key.as_ref())
        {
            entry.1 = value;
        } else {
            self.contents.push((key, value));
        }
    }

    /// Removes a content entry; returns whether the key was present.
    pub fn del_content(&mut self, key: impl AsRef<[u8]>) -> bool {
        let key = key.as_ref();
        let before = self.contents.len();
        self.contents.retain(|(k, _)| k.as_ref() != key);
        self.contents.len() != before
    }

    pub fn contents(&self) -> &[(Bytes, Bytes)] {
        &self.contents
    }

    pub fn content_keys(&self) -> impl Iterator<Item = &Bytes> {
        self.contents.iter().map(|(k, _)| k)
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn data_size(&self) -> usize {
        self.contents
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

/// The value carried by a metric event: either a single double or a mapping
/// of named doubles.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MetricValue {
    #[default]
    Empty,
    Single(f64),
    MultiDouble(Vec<(Bytes, f64)>),
}

impl MetricValue {
    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<f64> {
        match self {
            MetricValue::MultiDouble(values) => {
                let key = key.as_ref();
                values
                    .iter()
                    .find(|(k, _)| k.as_ref() == key)
                    .map(|(_, v)| *v)
            }
            _ => None,
        }
    }

    /// Sets a named value; promotes `Empty` to a multi-double mapping.
    pub fn set(&mut self, key: Bytes, value: f64) {
        if !matches!(self, MetricValue::MultiDouble(_)) {
            *self = MetricValue::MultiDouble(Vec::new());
        }
        if let MetricValue::MultiDouble(values) = self {
            if let Some(entry) = values.iter_mut().find(|(k, _)| k.as_ref() == key.as_ref()) {
                entry.1 = value;
            } else {
                values.push((key, value));
            }
        }
    }

    pub fn del(&mut self, key: impl AsRef<[u8]>) {
        if let MetricValue::MultiDouble(values) = self {
            let key = key.as_ref();
            values.retain(|(k, _)| k.as_ref() != key);
        }
    }

    pub fn data_size(&self) -> usize {
        match self {
            MetricValue::Empty => 0,
            MetricValue::Single(_) => std::mem::size_of::<f64>(),
            MetricValue::MultiDouble(values) => values
                .iter()
                .map(|(k, _)| k.len() + std::mem::size_of::<f64>())
                .sum(),
        }
    }
}

/// A metric sample: name, timestamp, value, and tags.
#[derive(Debug, Default)]
pub struct MetricEvent {
    pub timestamp: Timestamp,
    pub name: Bytes,
    pub value: MetricValue,
    tags: Vec<(Bytes, Bytes)>,
}

impl MetricEvent {
    pub fn new(name: Bytes, timestamp: Timestamp, value: MetricValue) -> Self {
        Self {
            timestamp,
            name,
            value,
            tags: Vec::new(),
        }
    }

    pub fn tag(&self, key: impl AsRef<[u8]>) -> Option<&Bytes> {
        let key = key.as_ref();
        self.tags
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v)
    }

    pub fn set_tag(&mut self, key: Bytes, value: Bytes) {
        if let Some(entry) = self.tags.iter_mut().find(|(k, _)| k.as_ref() == key.as_ref()) {
            entry.1 = value;
        } else {
            self.tags.push((key, value));
        }
    }

    pub fn tags(&self) -> &[(Bytes, Bytes)] {
        &self.tags
    }

    pub fn data_size(&self) -> usize {
        self.name.len()
            + self.value.data_size()
            + self.tags.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>()
    }
}

/// A trace span event.
#[derive(Debug, Default)]
pub struct SpanEvent {
    pub timestamp: Timestamp,
    pub trace_id: Bytes,
    pub span_id: Bytes,
    pub name: Bytes,
    pub duration_ns: u64,
    pub tags: Vec<(Bytes, Bytes)>,
}

impl SpanEvent {
    pub fn data_size(&self) -> usize {
        self.trace_id.len()
            + self.span_id.len()
            + self.name.len()
            + self.tags.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>()
    }
}

/// An opaque payload that no native processor has interpreted yet.
#[derive(Debug, Default)]
pub struct RawEvent {
    pub timestamp: Timestamp,
    pub content: Bytes,
}

/// A single record flowing through the pipeline.
#[derive(Debug)]
pub enum Event {
    Log(LogEvent),
    Metric(MetricEvent),
    Span(SpanEvent),
    Raw(RawEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Log(_) => EventKind::Log,
            Event::Metric(_) => EventKind::Metric,
            Event::Span(_) => EventKind::Span,
            Event::Raw(_) => EventKind::Raw,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Event::Log(e) => e.timestamp,
            Event::Metric(e) => e.timestamp,
            Event::Span(e) => e.timestamp,
            Event::Raw(e) => e.timestamp,
        }
    }

    pub fn as_log(&self) -> Option<&LogEvent> {
        match self {
            Event::Log(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_log_mut(&mut self) -> Option<&mut LogEvent> {
        match self {
            Event::Log(e) => Some(e),
            _ => None,
        }
    }

    pub fn data_size(&self) -> usize {
        match self {
            Event::Log(e) => e.data_size(),
            Event::Metric(e) => e.data_size(),
            Event::Span(e) => e.data_size(),
            Event::Raw(e) => e.content.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_content_order_is_insertion_order() {
        let mut log = LogEvent::new(Timestamp::from_secs(1700000000));
        log.set_content("b", "2");
        log.set_content("a", "1");
        log.set_content("c", "3");
        let keys: Vec<_> = log.content_keys().map(|k| k.as_ref().to_vec()).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"a".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_log_set_existing_key_keeps_position() {
        let mut log = LogEvent::new(Timestamp::default());
        log.set_content("a", "1");
        log.set_content("b", "2");
        log.set_content("a", "updated");
        let keys: Vec<_> = log.content_keys().map(|k| k.as_ref().to_vec()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(log.content("a").unwrap().as_ref(), b"updated");
    }

    #[test]
    fn test_log_del_content() {
        let mut log = LogEvent::new(Timestamp::default());
        log.set_content("a", "1");
        assert!(log.del_content("a"));
        assert!(!log.del_content("a"));
        assert!(log.is_empty());
    }

    #[test]
    fn test_metric_value_variants() {
        let mut value = MetricValue::Empty;
        assert_eq!(value.data_size(), 0);
        value.set(Bytes::from_static(b"p99"), 0.25);
        value.set(Bytes::from_static(b"p50"), 0.10);
        assert_eq!(value.get("p99"), Some(0.25));
        value.del("p99");
        assert_eq!(value.get("p99"), None);

        let single = MetricValue::Single(1.5);
        assert_eq!(single.get("anything"), None);
    }

    #[test]
    fn test_event_kind_and_timestamp() {
        let event = Event::Log(LogEvent::new(Timestamp::with_nanos(10, 500)));
        assert_eq!(event.kind(), EventKind::Log);
        assert_eq!(event.timestamp().secs, 10);
        assert_eq!(event.timestamp().nanos, Some(500));
    }
}
