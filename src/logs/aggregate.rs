//! Batch statistics over classified records.
//!
//! A `LogBatch` is always derived in full from its record set; callers build
//! a new batch instead of patching counters when records change.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{parse_timestamp, LogLevel, LogRecord};
use crate::util::OrderedSet;

/// Keyword rules for recurring-error tags. Scanned in this order per message,
/// case-insensitive substring match against error-level messages only.
const PATTERN_RULES: &[(&str, &[&str])] = &[
    ("connection", &["connection", "connect"]),
    ("timeout", &["timeout", "timed out"]),
    ("not-found", &["not found", "404", "no such"]),
    ("auth", &["auth", "unauthorized", "forbidden", "permission denied"]),
    ("memory", &["out of memory", "memory", "oom"]),
    ("disk", &["disk", "no space", "enospc"]),
    ("network", &["network", "unreachable", "dns"]),
];

/// Calendar-time extent of a batch, min/max over the records whose raw
/// timestamps parse. Records with unparseable timestamps still count in the
/// tallies, they just do not widen the span.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Summary statistics over an ordered sequence of classified records.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    pub records: Vec<LogRecord>,
    pub total_count: usize,
    pub error_count: usize,
    pub warn_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_span: Option<TimeSpan>,
    pub distinct_sources: Vec<String>,
}

impl LogBatch {
    /// Reduce records into a batch. Record order is preserved and treated as
    /// arrival order everywhere "recent" matters.
    pub fn from_records(records: Vec<LogRecord>) -> Self {
        let total_count = records.len();
        let error_count = records
            .iter()
            .filter(|r| r.level == LogLevel::Error)
            .count();
        let warn_count = records.iter().filter(|r| r.level == LogLevel::Warn).count();

        let mut span: Option<TimeSpan> = None;
        for record in &records {
            if let Some(ts) = parse_timestamp(&record.timestamp) {
                span = Some(match span {
                    None => TimeSpan { start: ts, end: ts },
                    Some(current) => TimeSpan {
                        start: current.start.min(ts),
                        end: current.end.max(ts),
                    },
                });
            }
        }

        let mut sources = OrderedSet::new();
        for record in &records {
            if let Some(source) = &record.source {
                if !source.is_empty() {
                    sources.insert(source.clone());
                }
            }
        }

        Self {
            records,
            total_count,
            error_count,
            warn_count,
            time_span: span,
            distinct_sources: sources.into_vec(),
        }
    }

    /// Up to `limit` most recent error records, oldest first within the tail.
    pub fn recent_errors(&self, limit: usize) -> Vec<&LogRecord> {
        self.recent_by_level(LogLevel::Error, limit)
    }

    /// Up to `limit` most recent warn records, oldest first within the tail.
    pub fn recent_warnings(&self, limit: usize) -> Vec<&LogRecord> {
        self.recent_by_level(LogLevel::Warn, limit)
    }

    fn recent_by_level(&self, level: LogLevel, limit: usize) -> Vec<&LogRecord> {
        let matching: Vec<&LogRecord> =
            self.records.iter().filter(|r| r.level == level).collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).collect()
    }
}

/// Recurring-error tags from a fixed vocabulary, deduplicated in first-seen
/// order. Only error-level messages are scanned; one message may contribute
/// several tags.
pub fn error_patterns(records: &[LogRecord]) -> Vec<String> {
    let mut tags = OrderedSet::new();
    for record in records {
        if record.level != LogLevel::Error {
            continue;
        }
        let message = record.message.to_lowercase();
        for (tag, keywords) in PATTERN_RULES {
            if keywords.iter().any(|kw| message.contains(kw)) {
                tags.insert(*tag);
            }
        }
    }
    tags.into_vec()
}
