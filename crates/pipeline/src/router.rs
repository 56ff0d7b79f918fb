//! Routing of event groups to sinks.

use bytes::Bytes;
use serde::Deserialize;
use telemetry_types::EventGroup;

use crate::error::PipelineResult;
use crate::monitor::Counter;

/// One routing rule: a matcher and the index of the sink it selects.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    #[serde(rename = "Matcher")]
    pub matcher: MatcherConfig,
    #[serde(rename = "Sink")]
    pub sink: usize,
}

/// Declarative matcher forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Type")]
pub enum MatcherConfig {
    /// Matches every group.
    #[serde(rename = "always")]
    Always,
    /// Matches groups carrying the given tag value.
    #[serde(rename = "tag")]
    Tag {
        #[serde(rename = "Key")]
        key: String,
        #[serde(rename = "Value")]
        value: String,
    },
    /// Matches groups where any log event carries the given content value.
    #[serde(rename = "content")]
    Content {
        #[serde(rename = "Key")]
        key: String,
        #[serde(rename = "Value")]
        value: String,
    },
}

/// A predicate over group metadata and per-event content.
pub trait Matcher: Send + Sync {
    fn matches(&self, group: &EventGroup) -> bool;
}

struct AlwaysMatcher;

impl Matcher for AlwaysMatcher {
    fn matches(&self, _group: &EventGroup) -> bool {
        true
    }
}

struct TagMatcher {
    key: Bytes,
    value: Bytes,
}

impl Matcher for TagMatcher {
    fn matches(&self, group: &EventGroup) -> bool {
        group
            .tag(&self.key)
            .map_or(false, |v| v.as_ref() == self.value.as_ref())
    }
}

struct ContentMatcher {
    key: Bytes,
    value: Bytes,
}

impl Matcher for ContentMatcher {
    fn matches(&self, group: &EventGroup) -> bool {
        group.events().iter().any(|event| {
            event
                .as_log()
                .and_then(|log| log.content(&self.key))
                .map_or(false, |v| v.as_ref() == self.value.as_ref())
        })
    }
}

fn build_matcher(config: &MatcherConfig) -> Box<dyn Matcher> {
    match config {
        MatcherConfig::Always => Box::new(AlwaysMatcher),
        MatcherConfig::Tag { key, value } => Box::new(TagMatcher {
            key: Bytes::from(key.clone()),
            value: Bytes::from(value.clone()),
        }),
        MatcherConfig::Content { key, value } => Box::new(ContentMatcher {
            key: Bytes::from(key.clone()),
            value: Bytes::from(value.clone()),
        }),
    }
}

/// Per-pipeline evaluator deciding which sinks receive each event group.
///
/// Without explicit routes every sink receives every group. With them, the
/// result is the union of matched sink indices in declaration order with
/// duplicates removed; an empty result drops the group and counts a routing
/// miss.
pub struct Router {
    routes: Vec<(Box<dyn Matcher>, usize)>,
    route_all: Vec<usize>,
    misses: Counter,
}

impl Router {
    pub fn init(config: Option<&[RouteConfig]>, sink_count: usize) -> PipelineResult<Router> {
        let routes = match config {
            Some(entries) => entries
                .iter()
                .map(|entry| (build_matcher(&entry.matcher), entry.sink))
                .collect(),
            None => Vec::new(),
        };
        Ok(Router {
            routes,
            route_all: if config.is_none() {
                (0..sink_count).collect()
            } else {
                Vec::new()
            },
            misses: Counter::new(),
        })
    }

    /// Returns the sink indices this group should be delivered to, in first
    /// match order.
    pub fn route(&self, group: &EventGroup) -> Vec<usize> {
        if self.routes.is_empty() {
            if self.route_all.is_empty() {
                self.misses.inc();
            }
            return self.route_all.clone();
        }
        let mut targets = Vec::new();
        for (matcher, sink) in &self.routes {
            if matcher.matches(group) && !targets.contains(sink) {
                targets.push(*sink);
            }
        }
        if targets.is_empty() {
            self.misses.inc();
        }
        targets
    }

    pub fn routing_misses(&self) -> u64 {
        self.misses.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn routes(value: serde_json::Value) -> Vec<RouteConfig> {
        serde_json::from_value(value).unwrap()
    }

    fn tagged_group(key: &str, value: &str) -> EventGroup {
        let mut group = EventGroup::new();
        group.set_tag(key, value);
        group
    }

    #[test]
    fn test_no_routes_configured_selects_all_sinks() {
        let router = Router::init(None, 3).unwrap();
        let group = EventGroup::new();
        assert_eq!(router.route(&group), vec![0, 1, 2]);
        assert_eq!(router.routing_misses(), 0);
    }

    #[test]
    fn test_matched_indices_dedup_in_declaration_order() {
        let config = routes(json!([
            {"Matcher": {"Type": "always"}, "Sink": 1},
            {"Matcher": {"Type": "tag", "Key": "env", "Value": "prod"}, "Sink": 0},
            {"Matcher": {"Type": "always"}, "Sink": 1},
        ]));
        let router = Router::init(Some(&config), 2).unwrap();

        let group = tagged_group("env", "prod");
        assert_eq!(router.route(&group), vec![1, 0]);

        let other = tagged_group("env", "dev");
        assert_eq!(router.route(&other), vec![1]);
    }

    #[test]
    fn test_no_match_counts_a_miss() {
        let config = routes(json!([
            {"Matcher": {"Type": "tag", "Key": "env", "Value": "prod"}, "Sink": 0},
        ]));
        let router = Router::init(Some(&config), 1).unwrap();
        assert!(router.route(&tagged_group("env", "dev")).is_empty());
        assert_eq!(router.routing_misses(), 1);
    }

    #[test]
    fn test_content_matcher_inspects_log_events() {
        use bytes::Bytes;
        use telemetry_types::{Event, LogEvent, Timestamp};

        let config = routes(json!([
            {"Matcher": {"Type": "content", "Key": "level", "Value": "error"}, "Sink": 0},
        ]));
        let router = Router::init(Some(&config), 1).unwrap();

        let mut group = EventGroup::new();
        let mut log = LogEvent::new(Timestamp::from_secs(0));
        log.set_content_no_copy(Bytes::from_static(b"level"), Bytes::from_static(b"error"));
        group.push_event(Event::Log(log));
        assert_eq!(router.route(&group), vec![0]);
    }
}
