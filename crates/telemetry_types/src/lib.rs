//! Event model for the telemetry pipeline
//!
//! This crate defines the in-memory representation of telemetry data flowing
//! through the agent: single events (log, metric, span, raw), event groups,
//! and the source buffer that backs the string views inside a group. All
//! string payloads use refcounted `Bytes` views so downstream stages can
//! reference slices without copying.

pub mod buffer;
pub mod event;
pub mod group;

pub use buffer::SourceBuffer;
pub use event::*;
pub use group::*;
