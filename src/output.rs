//! Line formatting for CLI output.

use anyhow::{Context, Result};
use sumo_search::{Item, ResultKind, SearchResults};

/// How a streamed item is rendered on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineFormat {
    /// The trimmed `_raw` field of a message.
    Raw,
    /// The whole item as one JSON object.
    Json,
}

impl LineFormat {
    /// Records are always JSON; messages only when asked for.
    pub(crate) fn for_kind(kind: ResultKind, json: bool) -> Self {
        if json || kind == ResultKind::Record {
            LineFormat::Json
        } else {
            LineFormat::Raw
        }
    }
}

/// Render one item as a single output line, without the trailing newline.
pub(crate) fn format_line(item: &Item, format: LineFormat) -> Result<String> {
    if format == LineFormat::Raw {
        if let Some(raw) = item.get("_raw").and_then(|v| v.as_str()) {
            return Ok(raw.trim().to_string());
        }
    }
    serde_json::to_string(item).context("failed to encode result item")
}

pub(crate) fn format_results(results: &SearchResults) -> Result<String> {
    serde_json::to_string_pretty(results).context("failed to encode search results")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(v: serde_json::Value) -> Item {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn raw_messages_print_trimmed_log_line() {
        let msg = item(json!({"_raw": "  2017-02-22 error: boom\n", "_messageid": "1"}));
        let line = format_line(&msg, LineFormat::for_kind(ResultKind::Message, false)).unwrap();
        assert_eq!(line, "2017-02-22 error: boom");
    }

    #[test]
    fn json_flag_prints_every_field() {
        let msg = item(json!({"_raw": "boom", "_messageid": "1"}));
        let line = format_line(&msg, LineFormat::for_kind(ResultKind::Message, true)).unwrap();
        let back: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(back, json!({"_raw": "boom", "_messageid": "1"}));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn records_are_always_json() {
        assert_eq!(
            LineFormat::for_kind(ResultKind::Record, false),
            LineFormat::Json
        );
        let rec = item(json!({"_count": "12", "_sourcecategory": "api"}));
        let line = format_line(&rec, LineFormat::Json).unwrap();
        assert!(line.starts_with('{') && line.contains("\"_count\":\"12\""));
    }

    #[test]
    fn message_without_raw_falls_back_to_json() {
        let msg = item(json!({"_messageid": "7"}));
        assert_eq!(
            format_line(&msg, LineFormat::Raw).unwrap(),
            r#"{"_messageid":"7"}"#
        );
    }

    #[test]
    fn aggregate_output_uses_camel_case() {
        let res = SearchResults {
            messages: vec![],
            records: vec![item(json!({"_count": "1"}))],
            limit: 10,
            limit_capped: false,
        };
        let out = format_results(&res).unwrap();
        assert!(out.contains("\"limitCapped\": false"));
        assert!(out.contains("\"records\""));
    }
}
