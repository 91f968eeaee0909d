//! Parsing of loosely-structured oracle output into strict result types.
//!
//! Oracles are instructed to return bare JSON but routinely wrap it in
//! markdown fences, prose, or slightly broken syntax. Extraction therefore
//! never errors: the verdict parser falls back to a degraded-but-valid
//! verdict, and the fix parser reports a miss so the caller can substitute
//! the canned fallback fix.

use serde_json::{Map, Value};

use super::{Fix, FixKind, Priority, TestCase, Verdict};

pub(crate) const DEFAULT_ROOT_CAUSE: &str = "Unable to determine root cause";
pub(crate) const DEFAULT_REASONING: &str = "Analysis completed";
pub(crate) const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Root cause reported when the oracle's text held no parseable JSON.
pub(crate) const PARSE_FAILED_ROOT_CAUSE: &str = "Analysis response could not be parsed";
/// Confidence reported on any fallback path.
pub(crate) const DEGRADED_CONFIDENCE: f64 = 0.3;

/// Drop a wrapping markdown code fence, with or without a language tag.
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the opening fence line only when it is a bare language tag.
    let body = match rest.find('\n') {
        Some(idx) if rest[..idx].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            &rest[idx + 1..]
        }
        _ => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Repair the JSON mistakes oracles make most: trailing commas, smart
/// quotes, stray control characters.
fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();

    fixed = fixed.replace(",]", "]");
    fixed = fixed.replace(",}", "}");

    fixed = fixed.replace('\u{201C}', "\"");
    fixed = fixed.replace('\u{201D}', "\"");
    fixed = fixed.replace('\u{2018}', "'");
    fixed = fixed.replace('\u{2019}', "'");

    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Every balanced top-level `open`..`close` span in `text`, in order.
///
/// The scan tracks JSON string state so brackets inside quoted values do not
/// affect depth. Earlier spans come first, which keeps the historical
/// "first top-level fragment wins" behavior when several are present.
fn top_level_spans(text: &str, open: char, close: char) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' && depth > 0 {
            in_string = true;
        } else if c == open {
            if depth == 0 {
                start = i;
            }
            depth += 1;
        } else if c == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                spans.push(&text[start..i + c.len_utf8()]);
            }
        }
    }

    spans
}

/// First span that parses as a JSON object, trying a sanitized copy when the
/// raw span fails.
fn first_object(text: &str) -> Option<Map<String, Value>> {
    for span in top_level_spans(text, '{', '}') {
        for candidate in [span.to_string(), fix_json_issues(span)] {
            if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&candidate) {
                return Some(obj);
            }
        }
    }
    None
}

/// First span that parses as a JSON array, same retry scheme.
fn first_array(text: &str) -> Option<Vec<Value>> {
    for span in top_level_spans(text, '[', ']') {
        for candidate in [span.to_string(), fix_json_issues(span)] {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&candidate) {
                return Some(items);
            }
        }
    }
    None
}

fn get<'a>(obj: &'a Map<String, Value>, primary: &str, alias: &str) -> Option<&'a Value> {
    obj.get(primary).or_else(|| obj.get(alias))
}

fn opt_string(obj: &Map<String, Value>, primary: &str, alias: &str) -> Option<String> {
    get(obj, primary, alias)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

fn string_or(obj: &Map<String, Value>, primary: &str, alias: &str, default: &str) -> String {
    opt_string(obj, primary, alias).unwrap_or_else(|| default.to_string())
}

fn string_list(obj: &Map<String, Value>, primary: &str, alias: &str) -> Vec<String> {
    get(obj, primary, alias)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn confidence_from(obj: &Map<String, Value>) -> f64 {
    let value = match obj.get("confidence") {
        Some(Value::Number(n)) => n.as_f64(),
        // Some oracles quote the number.
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0)
}

/// Parse oracle text into a verdict. Infallible: missing and mistyped
/// fields get defaults; text with no parseable JSON object at all becomes a
/// degraded verdict whose reasoning is the full raw text.
pub fn parse_verdict(raw: &str) -> Verdict {
    let clean = strip_markdown_fences(raw);

    if let Some(obj) = first_object(clean) {
        return Verdict {
            summary: opt_string(&obj, "summary", "summary"),
            root_cause: string_or(&obj, "rootCause", "root_cause", DEFAULT_ROOT_CAUSE),
            affected_components: string_list(&obj, "affectedComponents", "affected_components"),
            confidence: confidence_from(&obj),
            reasoning: string_or(&obj, "reasoning", "reasoning", DEFAULT_REASONING),
        };
    }

    Verdict {
        summary: None,
        root_cause: PARSE_FAILED_ROOT_CAUSE.to_string(),
        affected_components: Vec::new(),
        confidence: DEGRADED_CONFIDENCE,
        reasoning: raw.to_string(),
    }
}

fn fix_from_object(index: usize, obj: &Map<String, Value>) -> Fix {
    let priority = match string_or(obj, "priority", "priority", "").to_lowercase().as_str() {
        "high" => Priority::High,
        "low" => Priority::Low,
        _ => Priority::Medium,
    };
    let kind = match string_or(obj, "kind", "type", "").to_lowercase().as_str() {
        "configuration" => FixKind::Configuration,
        "infrastructure" => FixKind::Infrastructure,
        _ => FixKind::Code,
    };

    Fix {
        id: format!("fix-{}", index + 1),
        description: string_or(obj, "description", "description", "No description provided"),
        priority,
        kind,
        code: opt_string(obj, "code", "code"),
        file_path: opt_string(obj, "filePath", "file_path"),
        explanation: string_or(obj, "explanation", "explanation", "No explanation provided"),
    }
}

/// Parse oracle text into fixes with positional ids. Returns `None` when no
/// usable array was found so the caller can substitute the fallback fix; an
/// array with zero usable elements counts as a miss too.
pub fn parse_fixes(raw: &str) -> Option<Vec<Fix>> {
    let clean = strip_markdown_fences(raw);
    let items = first_array(clean)?;

    let fixes: Vec<Fix> = items
        .iter()
        .filter_map(|v| v.as_object())
        .enumerate()
        .map(|(index, obj)| fix_from_object(index, obj))
        .collect();

    if fixes.is_empty() {
        None
    } else {
        Some(fixes)
    }
}

/// The canned fix returned whenever fix generation was requested but the
/// oracle produced nothing usable. Guarantees at least one suggestion.
pub fn fallback_fixes() -> Vec<Fix> {
    vec![Fix {
        id: "fix-1".to_string(),
        description: "Add defensive error handling around the failing operation".to_string(),
        priority: Priority::High,
        kind: FixKind::Code,
        code: None,
        file_path: None,
        explanation: "The fix generator did not return usable output. Hardening the error \
                      paths surfaced in the logs is a safe first step while the root cause \
                      is confirmed."
            .to_string(),
    }]
}

/// Test framework implied by a fix's file extension.
fn default_framework(file_path: Option<&str>) -> String {
    let ext = file_path
        .map(std::path::Path::new)
        .and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match ext {
        "rs" => "cargo test",
        "ts" | "tsx" | "js" | "jsx" => "jest",
        "py" => "pytest",
        "go" => "go test",
        _ => "generic",
    }
    .to_string()
}

/// Default test location: the fix's path with `.test` slipped in before the
/// extension.
fn derive_test_path(file_path: &str) -> String {
    let ext = std::path::Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str());
    match ext {
        Some(ext) => {
            let stem = &file_path[..file_path.len() - ext.len() - 1];
            format!("{}.test.{}", stem, ext)
        }
        None => format!("{}.test", file_path),
    }
}

/// Parse one generated test for `fix`. Returns `None` when the response held
/// no JSON object or the object carries no test code; the caller skips that
/// fix silently and assigns the positional id afterwards.
pub fn parse_test_case(raw: &str, fix: &Fix) -> Option<TestCase> {
    let clean = strip_markdown_fences(raw);
    let obj = first_object(clean)?;
    let code = opt_string(&obj, "code", "code")?;

    let fallback_path = fix
        .file_path
        .as_deref()
        .map(derive_test_path)
        .unwrap_or_else(|| "generated.test".to_string());

    Some(TestCase {
        id: String::new(),
        fix_id: fix.id.clone(),
        description: string_or(
            &obj,
            "description",
            "description",
            &format!("Test for: {}", fix.description),
        ),
        framework: opt_string(&obj, "framework", "framework")
            .unwrap_or_else(|| default_framework(fix.file_path.as_deref())),
        code,
        file_path: opt_string(&obj, "filePath", "file_path").unwrap_or(fallback_path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fix() -> Fix {
        Fix {
            id: "fix-1".to_string(),
            description: "bound the pool".to_string(),
            priority: Priority::High,
            kind: FixKind::Code,
            code: Some("pool.max(10)".to_string()),
            file_path: Some("src/db/pool.rs".to_string()),
            explanation: "prevents exhaustion".to_string(),
        }
    }

    #[test]
    fn test_verdict_embedded_in_prose() {
        let raw = r#"Here is my analysis:
{"rootCause": "connection pool exhausted", "confidence": 0.85, "reasoning": "all errors hit the pool", "affectedComponents": ["db"]}
Hope that helps!"#;
        let verdict = parse_verdict(raw);
        assert_eq!(verdict.root_cause, "connection pool exhausted");
        assert_eq!(verdict.confidence, 0.85);
        assert_eq!(verdict.affected_components, vec!["db"]);
    }

    #[test]
    fn test_verdict_inside_markdown_fence() {
        let raw = "```json\n{\"rootCause\": \"bad deploy\", \"confidence\": 0.7}\n```";
        let verdict = parse_verdict(raw);
        assert_eq!(verdict.root_cause, "bad deploy");
        assert_eq!(verdict.reasoning, DEFAULT_REASONING);
    }

    #[test]
    fn test_verdict_without_json_degrades() {
        let raw = "I believe the database is overloaded but cannot be sure.";
        let verdict = parse_verdict(raw);
        assert_eq!(verdict.root_cause, PARSE_FAILED_ROOT_CAUSE);
        assert_eq!(verdict.confidence, DEGRADED_CONFIDENCE);
        assert_eq!(verdict.reasoning, raw);
        assert!(verdict.summary.is_none());
    }

    #[test]
    fn test_verdict_defaults_for_missing_fields() {
        let verdict = parse_verdict("{}");
        assert_eq!(verdict.root_cause, DEFAULT_ROOT_CAUSE);
        assert!(verdict.affected_components.is_empty());
        assert_eq!(verdict.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(verdict.reasoning, DEFAULT_REASONING);
    }

    #[test]
    fn test_verdict_accepts_snake_case_aliases() {
        let verdict =
            parse_verdict(r#"{"root_cause": "oom", "affected_components": ["worker"]}"#);
        assert_eq!(verdict.root_cause, "oom");
        assert_eq!(verdict.affected_components, vec!["worker"]);
    }

    #[test]
    fn test_verdict_tolerates_type_mismatch() {
        let verdict = parse_verdict(r#"{"rootCause": "oom", "affectedComponents": "worker"}"#);
        assert_eq!(verdict.root_cause, "oom");
        assert!(verdict.affected_components.is_empty());
    }

    #[test]
    fn test_confidence_is_clamped_and_string_tolerant() {
        assert_eq!(parse_verdict(r#"{"confidence": 1.7}"#).confidence, 1.0);
        assert_eq!(parse_verdict(r#"{"confidence": -2}"#).confidence, 0.0);
        assert_eq!(parse_verdict(r#"{"confidence": "0.8"}"#).confidence, 0.8);
    }

    #[test]
    fn test_braces_inside_strings_do_not_break_the_scan() {
        let raw = r#"{"rootCause": "bad template: {user} missing", "confidence": 0.6}"#;
        let verdict = parse_verdict(raw);
        assert_eq!(verdict.root_cause, "bad template: {user} missing");
    }

    #[test]
    fn test_first_top_level_object_wins() {
        let raw = r#"{"rootCause": "first"} and later {"rootCause": "second"}"#;
        assert_eq!(parse_verdict(raw).root_cause, "first");
    }

    #[test]
    fn test_invalid_first_object_falls_through_to_valid_one() {
        let raw = r#"{not valid json} {"rootCause": "second"}"#;
        assert_eq!(parse_verdict(raw).root_cause, "second");
    }

    #[test]
    fn test_trailing_commas_are_repaired() {
        let verdict = parse_verdict(r#"{"rootCause": "leak", "affectedComponents": ["api",],}"#);
        assert_eq!(verdict.root_cause, "leak");
        assert_eq!(verdict.affected_components, vec!["api"]);
    }

    #[test]
    fn test_parse_fixes_assigns_positional_ids() {
        let raw = r#"Suggested changes:
[
  {"description": "bound pool", "priority": "high", "kind": "code", "code": "max(10)", "filePath": "src/db.rs", "explanation": "x"},
  {"description": "raise timeout", "priority": "silly", "kind": "unknown"}
]"#;
        let fixes = parse_fixes(raw).unwrap();
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].id, "fix-1");
        assert_eq!(fixes[0].priority, Priority::High);
        assert_eq!(fixes[1].id, "fix-2");
        assert_eq!(fixes[1].priority, Priority::Medium);
        assert_eq!(fixes[1].kind, FixKind::Code);
        assert_eq!(fixes[1].explanation, "No explanation provided");
        assert!(fixes[1].code.is_none());
    }

    #[test]
    fn test_parse_fixes_misses_on_non_json() {
        assert!(parse_fixes("no structured content here").is_none());
        assert!(parse_fixes("[]").is_none());
        assert!(parse_fixes(r#"["just", "strings"]"#).is_none());
    }

    #[test]
    fn test_fallback_is_exactly_one_high_priority_code_fix() {
        let fixes = fallback_fixes();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].id, "fix-1");
        assert_eq!(fixes[0].priority, Priority::High);
        assert_eq!(fixes[0].kind, FixKind::Code);
    }

    #[test]
    fn test_parse_test_case_with_full_object() {
        let raw = r##"{"description": "rejects 11th connection", "framework": "cargo test", "code": "#[test] fn t() {}", "filePath": "src/db/pool_test.rs"}"##;
        let test = parse_test_case(raw, &sample_fix()).unwrap();
        assert_eq!(test.fix_id, "fix-1");
        assert_eq!(test.framework, "cargo test");
        assert_eq!(test.file_path, "src/db/pool_test.rs");
    }

    #[test]
    fn test_parse_test_case_derives_defaults_from_fix() {
        let test = parse_test_case(r#"{"code": "assert!(true);"}"#, &sample_fix()).unwrap();
        assert_eq!(test.framework, "cargo test");
        assert_eq!(test.file_path, "src/db/pool.test.rs");
        assert!(test.description.contains("bound the pool"));
    }

    #[test]
    fn test_parse_test_case_skips_without_json_or_code() {
        assert!(parse_test_case("cannot help with that", &sample_fix()).is_none());
        assert!(parse_test_case(r#"{"description": "no code given"}"#, &sample_fix()).is_none());
    }

    #[test]
    fn test_derive_test_path_handles_dotted_directories() {
        assert_eq!(derive_test_path("src/db.rs"), "src/db.test.rs");
        assert_eq!(derive_test_path("api/v1.2/handler.py"), "api/v1.2/handler.test.py");
        assert_eq!(derive_test_path("Makefile"), "Makefile.test");
    }

    #[test]
    fn test_default_framework_by_extension() {
        assert_eq!(default_framework(Some("a.rs")), "cargo test");
        assert_eq!(default_framework(Some("a.tsx")), "jest");
        assert_eq!(default_framework(Some("a.py")), "pytest");
        assert_eq!(default_framework(Some("a.tf")), "generic");
        assert_eq!(default_framework(None), "generic");
    }
}
