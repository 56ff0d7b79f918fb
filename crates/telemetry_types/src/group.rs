//! Event groups: ordered batches of events with shared metadata and storage.

use std::collections::HashMap;

use bytes::Bytes;

use crate::buffer::SourceBuffer;
use crate::event::{Event, LogEvent, MetricEvent, MetricValue, RawEvent, SpanEvent};

/// Well-known group-level metadata keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupMetaKey {
    /// Resolved path of the file the group was read from.
    LogFilePath,
    /// Host the events originated on.
    SourceHost,
    /// Logical topic assigned by the input.
    Topic,
    /// Container the events were collected from.
    ContainerName,
}

/// An ordered batch of events sharing group-level metadata, tags, and an
/// owning source buffer.
///
/// Groups are move-only: there is no `Clone`. Fanning out to several sinks
/// goes through [`EventGroup::copy`], which produces a structurally identical
/// group backed by an independent buffer.
#[derive(Debug, Default)]
pub struct EventGroup {
    events: Vec<Event>,
    metadata: HashMap<GroupMetaKey, Bytes>,
    tags: Vec<(Bytes, Bytes)>,
    buffer: SourceBuffer,
}

impl EventGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut Vec<Event> {
        &mut self.events
    }

    pub fn push_event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn metadata(&self, key: GroupMetaKey) -> Option<&Bytes> {
        self.metadata.get(&key)
    }

    /// Sets group metadata, copying the value into the group's buffer.
    pub fn set_metadata(&mut self, key: GroupMetaKey, value: impl AsRef<[u8]>) {
        let value = self.buffer.copy_string(value);
        self.metadata.insert(key, value);
    }

    pub fn tag(&self, key: impl AsRef<[u8]>) -> Option<&Bytes> {
        let key = key.as_ref();
        self.tags
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v)
    }

    /// Sets a group tag, copying key and value into the group's buffer.
    pub fn set_tag(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        let key = self.buffer.copy_string(key);
        let value = self.buffer.copy_string(value);
        if let Some(entry) = self.tags.iter_mut().find(|(k, _)| k.as_ref() == key.as_ref()) {
            entry.1 = value;
        } else {
            self.tags.push((key, value));
        }
    }

    pub fn tags(&self) -> &[(Bytes, Bytes)] {
        &self.tags
    }

    /// Copies `data` into the group's buffer and returns an immutable view.
    pub fn copy_string(&mut self, data: impl AsRef<[u8]>) -> Bytes {
        self.buffer.copy_string(data)
    }

    /// Returns a writable region of capacity at least `n`; freeze it and
    /// attach the resulting view to an event in this group.
    pub fn allocate(&mut self, n: usize) -> bytes::BytesMut {
        self.buffer.allocate(n)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn data_size(&self) -> usize {
        self.events.iter().map(Event::data_size).sum()
    }

    /// Produces a structurally identical group with an independent buffer.
    ///
    /// Every string is re-copied, so the two groups share no storage and can
    /// be handed to different sinks.
    pub fn copy(&self) -> EventGroup {
        let mut out = EventGroup::new();
        for (key, value) in &self.metadata {
            out.set_metadata(*key, value);
        }
        for (key, value) in &self.tags {
            out.set_tag(key, value);
        }
        for event in &self.events {
            let copied = copy_event(event, &mut out.buffer);
            out.events.push(copied);
        }
        out
    }
}

fn copy_event(event: &Event, buffer: &mut SourceBuffer) -> Event {
    match event {
        Event::Log(log) => {
            let mut out = LogEvent::new(log.timestamp);
            for (key, value) in log.contents() {
                out.set_content_no_copy(buffer.copy_string(key), buffer.copy_string(value));
            }
            Event::Log(out)
        }
        Event::Metric(metric) => {
            let value = match &metric.value {
                MetricValue::Empty => MetricValue::Empty,
                MetricValue::Single(v) => MetricValue::Single(*v),
                MetricValue::MultiDouble(values) => MetricValue::MultiDouble(
                    values
                        .iter()
                        .map(|(k, v)| (buffer.copy_string(k), *v))
                        .collect(),
                ),
            };
            let mut out =
                MetricEvent::new(buffer.copy_string(&metric.name), metric.timestamp, value);
            for (key, value) in metric.tags() {
                out.set_tag(buffer.copy_string(key), buffer.copy_string(value));
            }
            Event::Metric(out)
        }
        Event::Span(span) => Event::Span(SpanEvent {
            timestamp: span.timestamp,
            trace_id: buffer.copy_string(&span.trace_id),
            span_id: buffer.copy_string(&span.span_id),
            name: buffer.copy_string(&span.name),
            duration_ns: span.duration_ns,
            tags: span
                .tags
                .iter()
                .map(|(k, v)| (buffer.copy_string(k), buffer.copy_string(v)))
                .collect(),
        }),
        Event::Raw(raw) => Event::Raw(RawEvent {
            timestamp: raw.timestamp,
            content: buffer.copy_string(&raw.content),
        }),
    }
}
