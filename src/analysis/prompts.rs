//! Prompt construction for the three oracle call sites.
//!
//! The JSON shapes embedded here are the wire contract with the oracle; the
//! parsers in [`super::extract`] accept exactly these shapes (plus snake_case
//! aliases for sloppy responders).

use crate::logs::{error_patterns, LogBatch};

use super::{Fix, Verdict};

/// Error records quoted in full in the evidence document.
pub(crate) const MAX_PROMPT_ERRORS: usize = 10;
/// Warn records quoted in the evidence document.
pub(crate) const MAX_PROMPT_WARNINGS: usize = 5;

const VERDICT_INSTRUCTIONS: &str = r#"You are a senior site reliability engineer performing incident root-cause analysis.

Respond with a single JSON object, no prose before or after:
{
  "summary": "one-paragraph incident summary",
  "rootCause": "the most likely root cause",
  "affectedComponents": ["service or module names"],
  "confidence": 0.0,
  "reasoning": "step-by-step reasoning grounded in the evidence",
  "suggestedActions": ["immediate mitigations"],
  "furtherInvestigation": ["follow-up checks worth running"]
}

RULES:
- confidence is a number between 0 and 1
- cite concrete log lines in reasoning when they exist
- if the evidence is insufficient, say so in rootCause instead of guessing"#;

const FIXES_INSTRUCTIONS: &str = r#"You are a senior developer proposing remediations for a diagnosed incident.

Respond with a JSON array of 3 to 5 fix objects, no prose before or after:
[
  {
    "description": "short imperative summary of the change",
    "priority": "high|medium|low",
    "kind": "code|configuration|infrastructure",
    "code": "the new or changed code, when kind is code",
    "filePath": "path the code belongs in",
    "explanation": "why this addresses the root cause"
  }
]

RULES:
- order fixes most impactful first
- prefer small, reviewable changes
- omit code and filePath for configuration or infrastructure fixes"#;

const TEST_INSTRUCTIONS: &str = r#"You are a senior developer writing a regression test for a specific fix.

Respond with a single JSON object, no prose before or after:
{
  "description": "what the test proves",
  "framework": "the test harness to run it with",
  "code": "the complete test code",
  "filePath": "where the test file belongs"
}"#;

/// Build the evidence document for the verdict call: the narrative plus,
/// when logs were supplied, totals, span, sources, recurring patterns, and
/// the most recent error/warn records.
pub fn analysis_prompt(narrative: &str, batch: Option<&LogBatch>) -> String {
    let mut prompt = String::new();
    prompt.push_str(VERDICT_INSTRUCTIONS);
    prompt.push_str("\n\nINCIDENT DESCRIPTION:\n");
    prompt.push_str(narrative.trim());

    let Some(batch) = batch else {
        return prompt;
    };

    prompt.push_str("\n\nLOG SUMMARY:\n");
    prompt.push_str(&format!(
        "- {} records ({} errors, {} warnings)\n",
        batch.total_count, batch.error_count, batch.warn_count
    ));
    if let Some(span) = &batch.time_span {
        prompt.push_str(&format!(
            "- time span: {} to {}\n",
            span.start.to_rfc3339(),
            span.end.to_rfc3339()
        ));
    }
    if !batch.distinct_sources.is_empty() {
        prompt.push_str(&format!(
            "- sources: {}\n",
            batch.distinct_sources.join(", ")
        ));
    }
    let patterns = error_patterns(&batch.records);
    if !patterns.is_empty() {
        prompt.push_str(&format!("- recurring patterns: {}\n", patterns.join(", ")));
    }

    let errors = batch.recent_errors(MAX_PROMPT_ERRORS);
    if !errors.is_empty() {
        prompt.push_str("\nRECENT ERRORS:\n");
        for record in errors {
            prompt.push_str(&format!("[{}] {}\n", record.timestamp, record.message));
            if let Some(stack) = &record.stack_trace {
                prompt.push_str(&format!("  stack: {}\n", stack));
            }
        }
    }

    let warnings = batch.recent_warnings(MAX_PROMPT_WARNINGS);
    if !warnings.is_empty() {
        prompt.push_str("\nRECENT WARNINGS:\n");
        for record in warnings {
            prompt.push_str(&format!("[{}] {}\n", record.timestamp, record.message));
        }
    }

    prompt
}

/// Build the fix-generation prompt from the parsed verdict.
pub fn fixes_prompt(narrative: &str, verdict: &Verdict) -> String {
    let mut prompt = String::new();
    prompt.push_str(FIXES_INSTRUCTIONS);
    prompt.push_str("\n\nINCIDENT:\n");
    prompt.push_str(narrative.trim());
    prompt.push_str(&format!("\n\nDIAGNOSED ROOT CAUSE:\n{}\n", verdict.root_cause));
    if !verdict.affected_components.is_empty() {
        prompt.push_str(&format!(
            "\nAFFECTED COMPONENTS:\n{}\n",
            verdict.affected_components.join(", ")
        ));
    }
    prompt.push_str(&format!("\nREASONING:\n{}\n", verdict.reasoning));
    prompt
}

/// Build the per-fix test-generation prompt. Only called for fixes that
/// carry both code and a file path.
pub fn test_prompt(fix: &Fix) -> String {
    let mut prompt = String::new();
    prompt.push_str(TEST_INSTRUCTIONS);
    prompt.push_str(&format!("\n\nFIX UNDER TEST:\n{}\n", fix.description));
    if let Some(path) = &fix.file_path {
        prompt.push_str(&format!("\nFILE:\n{}\n", path));
    }
    if let Some(code) = &fix.code {
        prompt.push_str(&format!("\nCODE:\n{}\n", code));
    }
    prompt.push_str(&format!("\nEXPLANATION:\n{}\n", fix.explanation));
    prompt
}
