//! Normalized log records shared by the classifier and the aggregator.
//!
//! A `LogRecord` keeps the timestamp as the raw string from the source line;
//! calendar-time interpretation only happens inside the aggregator's span
//! computation, and records whose timestamps cannot be parsed still count.

pub mod aggregate;
pub mod classify;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

pub use aggregate::{error_patterns, LogBatch, TimeSpan};
pub use classify::{classify_line, classify_lines};

/// Normalized severity. Construction goes through [`LogLevel::from_str_lossy`],
/// so a record always carries one of these four values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Map a raw level token onto the four-value scale.
    ///
    /// Lowercases first, then folds the common synonyms seen across log
    /// families (`FATAL`, `warning`, `trace`, ...). Unknown tokens become
    /// `Info`, mirroring the classifier's default for absent levels.
    pub fn from_str_lossy(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "error" | "err" | "fatal" | "critical" | "crit" | "severe" | "emerg" | "alert"
            | "panic" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "debug" | "trace" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }

    /// True when the token is one the matchers should treat as a level at all.
    pub(crate) fn is_known_token(raw: &str) -> bool {
        matches!(
            raw.trim().to_lowercase().as_str(),
            "error"
                | "err"
                | "fatal"
                | "critical"
                | "crit"
                | "severe"
                | "emerg"
                | "alert"
                | "panic"
                | "warn"
                | "warning"
                | "info"
                | "notice"
                | "debug"
                | "trace"
        )
    }
}

/// One classified log line. Immutable once built.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Raw timestamp text, format-dependent (not normalized to one clock).
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

impl LogRecord {
    pub fn new(timestamp: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            level,
            message: message.into(),
            source: None,
            stack_trace: None,
            context: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_stack_trace(mut self, stack: impl Into<String>) -> Self {
        self.stack_trace = Some(stack.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Map<String, serde_json::Value>) -> Self {
        self.context = Some(context);
        self
    }
}

/// Timestamp formats attempted, in order, when interpreting a record's raw
/// timestamp as calendar time. Naive formats are assumed UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S,%3f",
    "%Y/%m/%d %H:%M:%S",
    "%a %b %d %H:%M:%S %Y",
];

/// Parse a format-dependent timestamp string into UTC calendar time.
///
/// Returns `None` for anything unrecognized; callers treat that as "record
/// excluded from span computation", never as an error.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    // Epoch seconds or milliseconds, as emitted by JSON loggers with numeric
    // time fields (the classifier stringifies those). unsigned_abs keeps the
    // magnitude test defined for i64::MIN.
    if let Ok(n) = raw.parse::<i64>() {
        if n.unsigned_abs() >= 100_000_000_000 {
            return DateTime::from_timestamp_millis(n);
        }
        return DateTime::from_timestamp(n, 0);
    }

    None
}
