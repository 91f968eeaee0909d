//! Multi-format log line classification.
//!
//! A fixed, ordered list of format matchers is tried against each line; the
//! first structural match wins. Lines matching none of the formats yield no
//! record and are dropped by the caller. A matcher that fails to parse is a
//! non-match for that matcher, never an error.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::{LogLevel, LogRecord};

/// Compiled matchers for the supported line formats.
///
/// Order of the `classify` body is the priority order; JSON is strict parsing
/// rather than pattern matching, so it produces no false positives against
/// the bracket-based formats.
pub struct LineClassifier {
    // [2024-01-15T10:30:00Z] ERROR: message
    bracketed: Regex,
    // 2024/01/15 10:30:00 [error] message   (nginx error log)
    slash_date: Regex,
    // [Mon Jan 15 10:30:00 2024] [error] message   (apache error log)
    double_bracket: Regex,
    // 2024-01-15T10:30:00Z ERROR message   (plain ISO prefix)
    iso_bare: Regex,
}

impl LineClassifier {
    pub fn new() -> Self {
        Self {
            bracketed: Regex::new(r"^\[([^\]]+)\]\s+([A-Za-z]+):?\s+(.+)$").unwrap(),
            slash_date: Regex::new(
                r"^(\d{4}/\d{2}/\d{2}\s+\d{2}:\d{2}:\d{2})\s+\[([A-Za-z]+)\]\s+(.+)$",
            )
            .unwrap(),
            double_bracket: Regex::new(
                r"^\[([^\]]+)\]\s+\[([^\]]+)\]\s+(?:\[client\s+[^\]]+\]\s+)?(.+)$",
            )
            .unwrap(),
            iso_bare: Regex::new(
                r"^(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\s+([A-Za-z]+):?\s+(.+)$",
            )
            .unwrap(),
        }
    }

    /// Classify one line, returning `None` when no format matches.
    pub fn classify(&self, line: &str) -> Option<LogRecord> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(record) = self.match_bracketed(line) {
            return Some(record);
        }
        if let Some(record) = self.match_json(line) {
            return Some(record);
        }
        if let Some(record) = self.match_slash_date(line) {
            return Some(record);
        }
        if let Some(record) = self.match_double_bracket(line) {
            return Some(record);
        }
        self.match_iso_bare(line)
    }

    fn match_bracketed(&self, line: &str) -> Option<LogRecord> {
        let caps = self.bracketed.captures(line)?;
        let level_token = &caps[2];
        // Requires a recognizable level so that `[req-42] Completed fast`
        // style lines fall through instead of classifying as info.
        if !LogLevel::is_known_token(level_token) {
            return None;
        }
        Some(
            LogRecord::new(&caps[1], LogLevel::from_str_lossy(level_token), &caps[3])
                .with_source("application"),
        )
    }

    fn match_json(&self, line: &str) -> Option<LogRecord> {
        if !line.starts_with('{') || !line.ends_with('}') {
            return None;
        }
        let value: Value = serde_json::from_str(line).ok()?;
        let obj = value.as_object()?;

        let level = match string_field(obj, &["level", "severity"]) {
            Some(raw) => LogLevel::from_str_lossy(&raw),
            None => LogLevel::Info,
        };
        let timestamp =
            string_field(obj, &["timestamp", "time", "@timestamp"]).unwrap_or_default();
        let message = string_field(obj, &["message", "msg"]).unwrap_or_default();

        let mut record = LogRecord::new(timestamp, level, message);
        if let Some(source) = string_field(obj, &["service", "source", "logger"]) {
            record = record.with_source(source);
        }
        if let Some(stack) = string_field(obj, &["stack", "stackTrace"]) {
            record = record.with_stack_trace(stack);
        }
        if let Some(context) = map_field(obj, &["context", "meta"]) {
            record = record.with_context(context);
        }
        Some(record)
    }

    fn match_slash_date(&self, line: &str) -> Option<LogRecord> {
        let caps = self.slash_date.captures(line)?;
        if !LogLevel::is_known_token(&caps[2]) {
            return None;
        }
        Some(
            LogRecord::new(&caps[1], LogLevel::from_str_lossy(&caps[2]), &caps[3])
                .with_source("nginx"),
        )
    }

    fn match_double_bracket(&self, line: &str) -> Option<LogRecord> {
        let caps = self.double_bracket.captures(line)?;
        // Modern apache writes `module:level` in the second bracket.
        let level_token = caps[2].rsplit(':').next().unwrap_or(&caps[2]);
        if !LogLevel::is_known_token(level_token) {
            return None;
        }
        Some(
            LogRecord::new(&caps[1], LogLevel::from_str_lossy(level_token), &caps[3])
                .with_source("apache"),
        )
    }

    fn match_iso_bare(&self, line: &str) -> Option<LogRecord> {
        let caps = self.iso_bare.captures(line)?;
        if !LogLevel::is_known_token(&caps[2]) {
            return None;
        }
        Some(
            LogRecord::new(&caps[1], LogLevel::from_str_lossy(&caps[2]), &caps[3])
                .with_source("application"),
        )
    }
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// First string-ish value found under any of the given keys.
fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        match obj.get(*key) {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn map_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<Map<String, Value>> {
    for key in keys {
        if let Some(Value::Object(map)) = obj.get(*key) {
            return Some(map.clone());
        }
    }
    None
}

static CLASSIFIER: OnceLock<LineClassifier> = OnceLock::new();

fn shared() -> &'static LineClassifier {
    CLASSIFIER.get_or_init(LineClassifier::new)
}

/// Classify a single raw line.
pub fn classify_line(line: &str) -> Option<LogRecord> {
    shared().classify(line)
}

/// Classify every line of a raw text blob, dropping blank and unmatched lines.
pub fn classify_lines(text: &str) -> Vec<LogRecord> {
    text.lines().filter_map(classify_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracketed_timestamp_line() {
        let record =
            classify_line("[2024-01-15T10:30:00Z] ERROR: database connection timeout").unwrap();
        assert_eq!(record.timestamp, "2024-01-15T10:30:00Z");
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.message, "database connection timeout");
        assert_eq!(record.source.as_deref(), Some("application"));
    }

    #[test]
    fn test_bracketed_requires_level_token() {
        assert!(classify_line("[req-42] Completed in 12ms").is_none());
    }

    #[test]
    fn test_json_line_with_canonical_keys() {
        let record = classify_line(
            r#"{"timestamp":"2024-01-15T10:31:00Z","level":"warn","message":"slow query","service":"db"}"#,
        )
        .unwrap();
        assert_eq!(record.level, LogLevel::Warn);
        assert_eq!(record.message, "slow query");
        assert_eq!(record.source.as_deref(), Some("db"));
    }

    #[test]
    fn test_json_line_key_aliases() {
        let record = classify_line(
            r#"{"@timestamp":"2024-01-15T10:31:00Z","severity":"ERROR","msg":"boom","logger":"worker","stack":"at x.rs:3","meta":{"request_id":"abc"}}"#,
        )
        .unwrap();
        assert_eq!(record.timestamp, "2024-01-15T10:31:00Z");
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.message, "boom");
        assert_eq!(record.source.as_deref(), Some("worker"));
        assert_eq!(record.stack_trace.as_deref(), Some("at x.rs:3"));
        let context = record.context.unwrap();
        assert_eq!(context["request_id"], "abc");
    }

    #[test]
    fn test_json_level_defaults_to_info() {
        let record = classify_line(r#"{"message":"started"}"#).unwrap();
        assert_eq!(record.level, LogLevel::Info);
        assert_eq!(record.timestamp, "");
        assert!(record.source.is_none());
    }

    #[test]
    fn test_json_numeric_timestamp_is_stringified() {
        let record = classify_line(r#"{"time":1705314600,"level":"info","msg":"up"}"#).unwrap();
        assert_eq!(record.timestamp, "1705314600");
    }

    #[test]
    fn test_nginx_style_line() {
        let record =
            classify_line("2024/01/15 10:30:00 [error] 12345#0: upstream timed out").unwrap();
        assert_eq!(record.timestamp, "2024/01/15 10:30:00");
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.message, "12345#0: upstream timed out");
        assert_eq!(record.source.as_deref(), Some("nginx"));
    }

    #[test]
    fn test_apache_style_line() {
        let record = classify_line(
            "[Mon Jan 15 10:30:00 2024] [error] [client 10.0.0.5] File does not exist",
        )
        .unwrap();
        assert_eq!(record.timestamp, "Mon Jan 15 10:30:00 2024");
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.message, "File does not exist");
        assert_eq!(record.source.as_deref(), Some("apache"));
    }

    #[test]
    fn test_apache_module_level_bracket() {
        let record =
            classify_line("[Mon Jan 15 10:30:00.123 2024] [core:warn] [pid 77] retrying").unwrap();
        assert_eq!(record.level, LogLevel::Warn);
        assert_eq!(record.message, "[pid 77] retrying");
    }

    #[test]
    fn test_iso_bare_level_line() {
        let record = classify_line("2024-01-15 10:30:00 WARN cache nearly full").unwrap();
        assert_eq!(record.level, LogLevel::Warn);
        assert_eq!(record.message, "cache nearly full");
        assert_eq!(record.source.as_deref(), Some("application"));
    }

    #[test]
    fn test_unmatched_lines_yield_nothing() {
        assert!(classify_line("").is_none());
        assert!(classify_line("completely free-form text").is_none());
        assert!(classify_line("{not json at all}").is_none());
        assert!(classify_line("[null]").is_none());
    }

    #[test]
    fn test_classify_lines_drops_garbage() {
        let text = "[2024-01-15T10:30:00Z] ERROR: db down\n\nnot a log line\n2024-01-15 10:31:00 INFO recovered";
        let records = classify_lines(text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, LogLevel::Error);
        assert_eq!(records[1].level, LogLevel::Info);
    }
}
