//! Options shared by parsing processors: what to do with the source field
//! when parsing succeeds or fails.

use serde::Deserialize;

/// Content key that keeps the original text when parsing fails.
pub const UNMATCH_LOG_KEY: &str = "__raw_log__";

/// Default key the source content is renamed to when it is kept on success.
pub const DEFAULT_RENAMED_SOURCE_KEY: &str = "__raw__";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommonParserOptions {
    #[serde(rename = "KeepingSourceWhenParseFail")]
    pub keeping_source_when_parse_fail: bool,
    #[serde(rename = "KeepingSourceWhenParseSucceed")]
    pub keeping_source_when_parse_succeed: bool,
    #[serde(rename = "RenamedSourceKey")]
    pub renamed_source_key: String,
    #[serde(rename = "CopingRawLog")]
    pub coping_raw_log: bool,
}

impl Default for CommonParserOptions {
    fn default() -> Self {
        Self {
            keeping_source_when_parse_fail: false,
            keeping_source_when_parse_succeed: false,
            renamed_source_key: DEFAULT_RENAMED_SOURCE_KEY.to_string(),
            coping_raw_log: false,
        }
    }
}

impl CommonParserOptions {
    /// Whether the original text should be added under
    /// [`UNMATCH_LOG_KEY`] after a failed parse.
    pub fn should_add_unmatch_log(&self, parse_success: bool) -> bool {
        !parse_success && (self.keeping_source_when_parse_fail || self.coping_raw_log)
    }

    /// Whether the event survives at all: parsed, or failed with the source
    /// retained.
    pub fn should_retain_event(&self, parse_success: bool) -> bool {
        parse_success || self.keeping_source_when_parse_fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options: CommonParserOptions = serde_json::from_value(json!({})).unwrap();
        assert!(!options.keeping_source_when_parse_fail);
        assert!(!options.keeping_source_when_parse_succeed);
        assert!(!options.coping_raw_log);
        assert_eq!(options.renamed_source_key, DEFAULT_RENAMED_SOURCE_KEY);
    }

    #[test]
    fn test_retention_rules() {
        let mut options = CommonParserOptions::default();
        assert!(options.should_retain_event(true));
        assert!(!options.should_retain_event(false));
        assert!(!options.should_add_unmatch_log(false));

        options.keeping_source_when_parse_fail = true;
        assert!(options.should_retain_event(false));
        assert!(options.should_add_unmatch_log(false));
        assert!(!options.should_add_unmatch_log(true));

        options.keeping_source_when_parse_fail = false;
        options.coping_raw_log = true;
        assert!(options.should_add_unmatch_log(false));
        assert!(!options.should_retain_event(false));
    }
}
