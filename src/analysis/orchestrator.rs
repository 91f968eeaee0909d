//! The analysis state machine over one request.
//!
//! Phases run strictly in order: evidence prompt, verdict, optional code
//! search, optional fixes, optional tests. Every oracle and backend failure
//! is absorbed into a fallback for its phase; the only way out without a
//! result is cancellation.

use std::sync::Arc;

use anyhow::Result;
use futures::future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::federation::RepoFederation;
use crate::logs::{classify_line, LogBatch};
use crate::oracle::{Oracle, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::util::OrderedSet;

use super::{
    extract, prompts, AnalysisRequest, AnalysisResult, CodeAnalysis, FeatureFlags, Fix, TestCase,
    Verdict,
};

const MAX_SEARCH_TERMS: usize = 10;
const MAX_AFFECTED_FILES: usize = 20;
const MAX_TESTED_FIXES: usize = 3;
const MINED_ERROR_MESSAGES: usize = 5;
const MIN_TERM_LEN: usize = 3;

/// Words too generic to search for when they come from a root-cause phrase.
/// Covers both fallback root-cause sentences so degraded analyses mine
/// nothing from them.
const ROOT_CAUSE_STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "was", "were", "are", "been", "being",
    "due", "has", "have", "had", "will", "would", "could", "should", "may", "might", "can",
    "cause", "caused", "causing", "root", "likely", "issue", "problem", "unable", "determine",
    "error", "errors", "failure", "failed", "failing", "analysis", "response", "not", "parsed",
];

/// Words too generic to search for when they come from log messages.
const ERROR_MESSAGE_STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "was", "were", "are", "error", "warning",
    "failed", "failure", "exception", "caused", "unexpected", "occurred", "unable", "request",
    "response", "while", "during",
];

/// Drives one analysis end to end against an oracle and the backend
/// federation.
pub struct IncidentAnalyzer {
    oracle: Arc<dyn Oracle>,
    federation: Arc<RepoFederation>,
}

impl IncidentAnalyzer {
    pub fn new(oracle: Arc<dyn Oracle>, federation: Arc<RepoFederation>) -> Self {
        Self { oracle, federation }
    }

    /// Entry point for callers holding raw log text: classifies and
    /// aggregates the lines, then runs the analysis.
    pub async fn analyze_incident(
        &self,
        narrative: &str,
        raw_log_lines: Option<Vec<String>>,
        flags: FeatureFlags,
    ) -> AnalysisResult {
        let mut request = AnalysisRequest::new(narrative).with_flags(flags);
        if let Some(lines) = raw_log_lines {
            let records: Vec<_> = lines.iter().filter_map(|line| classify_line(line)).collect();
            debug!(
                supplied = lines.len(),
                classified = records.len(),
                "classified raw log lines"
            );
            request = request.with_batch(LogBatch::from_records(records));
        }
        self.analyze(request).await
    }

    /// Run an analysis to completion. Never fails; internal failures degrade
    /// the result instead.
    pub async fn analyze(&self, request: AnalysisRequest) -> AnalysisResult {
        let inert = CancellationToken::new();
        match self.analyze_with_cancellation(request, &inert).await {
            Ok(result) => result,
            // Cancellation is the only error source and the inert token
            // never fires; the degraded arm keeps this total regardless.
            Err(err) => AnalysisResult::assemble(
                degraded_verdict(&err),
                None,
                None,
                Vec::new(),
                Vec::new(),
            ),
        }
    }

    /// Like [`analyze`](Self::analyze), but aborts promptly when `cancel`
    /// fires. Cancellation is the only error this returns.
    pub async fn analyze_with_cancellation(
        &self,
        request: AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let AnalysisRequest {
            narrative,
            batch,
            flags,
        } = request;

        let prompt = prompts::analysis_prompt(&narrative, batch.as_ref());
        let verdict = match self.generate(&prompt, cancel).await? {
            Ok(raw) => extract::parse_verdict(&raw),
            Err(err) => {
                warn!(error = %err, "verdict call failed, degrading");
                degraded_verdict(&err)
            }
        };

        let code_analysis = match (&batch, flags.include_code_search) {
            (Some(batch), true) => Some(self.code_analysis(&verdict, batch, cancel).await?),
            _ => None,
        };

        let fixes = if flags.include_fixes {
            let prompt = prompts::fixes_prompt(&narrative, &verdict);
            match self.generate(&prompt, cancel).await? {
                Ok(raw) => extract::parse_fixes(&raw).unwrap_or_else(|| {
                    debug!("fix response unusable, substituting fallback");
                    extract::fallback_fixes()
                }),
                Err(err) => {
                    warn!(error = %err, "fix call failed, substituting fallback");
                    extract::fallback_fixes()
                }
            }
        } else {
            Vec::new()
        };

        let tests = if flags.include_tests && !fixes.is_empty() {
            self.generate_tests(&fixes, cancel).await?
        } else {
            Vec::new()
        };

        info!(
            confidence = verdict.confidence,
            fixes = fixes.len(),
            tests = tests.len(),
            "analysis assembled"
        );
        Ok(AnalysisResult::assemble(
            verdict,
            batch,
            code_analysis,
            fixes,
            tests,
        ))
    }

    /// One oracle call guarded by the cancellation token. The outer error is
    /// cancellation; the inner one is an ordinary call failure feeding a
    /// fallback path.
    async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Result<String>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("analysis cancelled"),
            outcome = self.oracle.generate(prompt, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE) => {
                Ok(outcome)
            }
        }
    }

    async fn code_analysis(
        &self,
        verdict: &Verdict,
        batch: &LogBatch,
        cancel: &CancellationToken,
    ) -> Result<CodeAnalysis> {
        let search_terms = mine_search_terms(verdict, batch);

        let connected = self.federation.list_connected().await;
        if connected.is_empty() {
            return Ok(CodeAnalysis {
                search_terms,
                affected_files: Vec::new(),
                backends_used: Vec::new(),
                potential_issues: vec![
                    "no repository backends connected; code search skipped".to_string()
                ],
            });
        }

        let searches = search_terms.iter().map(|term| self.federation.search_all(term));
        let reports = tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("analysis cancelled"),
            reports = future::join_all(searches) => reports,
        };

        let mut files = OrderedSet::new();
        let mut backends = OrderedSet::new();
        let mut issues = OrderedSet::new();
        for report in reports {
            for hit in report.hits {
                if files.len() < MAX_AFFECTED_FILES {
                    files.insert(hit.path);
                }
            }
            backends.extend(report.backends_used);
            for failure in report.failures {
                issues.insert(format!(
                    "backend {} failed: {}",
                    failure.backend_id, failure.error
                ));
            }
        }

        Ok(CodeAnalysis {
            search_terms,
            affected_files: files.into_vec(),
            backends_used: backends.into_vec(),
            potential_issues: issues.into_vec(),
        })
    }

    /// Concurrent per-fix test generation for the first few fixes that carry
    /// both code and a file path. Failed calls and unusable responses skip
    /// that fix; ids are positional over the tests actually produced.
    async fn generate_tests(
        &self,
        fixes: &[Fix],
        cancel: &CancellationToken,
    ) -> Result<Vec<TestCase>> {
        let candidates: Vec<&Fix> = fixes
            .iter()
            .filter(|fix| fix.code.is_some() && fix.file_path.is_some())
            .take(MAX_TESTED_FIXES)
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let calls = candidates.into_iter().map(|fix| {
            let prompt = prompts::test_prompt(fix);
            async move {
                let outcome = self
                    .oracle
                    .generate(&prompt, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE)
                    .await;
                (fix, outcome)
            }
        });

        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("analysis cancelled"),
            outcomes = future::join_all(calls) => outcomes,
        };

        let mut tests = Vec::new();
        for (fix, outcome) in outcomes {
            match outcome {
                Ok(raw) => match extract::parse_test_case(&raw, fix) {
                    Some(mut test) => {
                        test.id = format!("test-{}", tests.len() + 1);
                        tests.push(test);
                    }
                    None => debug!(fix = %fix.id, "test response unusable, skipping"),
                },
                Err(err) => warn!(fix = %fix.id, error = %err, "test call failed, skipping"),
            }
        }
        Ok(tests)
    }
}

fn degraded_verdict(err: &anyhow::Error) -> Verdict {
    Verdict {
        summary: None,
        root_cause: extract::DEFAULT_ROOT_CAUSE.to_string(),
        affected_components: Vec::new(),
        confidence: extract::DEGRADED_CONFIDENCE,
        reasoning: format!("Analysis unavailable: {}", err),
    }
}

/// Up to ten deduplicated search terms mined from the root cause and the
/// most recent error messages, each with its own stop-word list.
fn mine_search_terms(verdict: &Verdict, batch: &LogBatch) -> Vec<String> {
    let mut terms = OrderedSet::new();

    collect_terms(&verdict.root_cause, ROOT_CAUSE_STOP_WORDS, &mut terms);
    for record in batch.recent_errors(MINED_ERROR_MESSAGES) {
        collect_terms(&record.message, ERROR_MESSAGE_STOP_WORDS, &mut terms);
    }

    let mut list = terms.into_vec();
    list.truncate(MAX_SEARCH_TERMS);
    list
}

fn collect_terms(text: &str, stop_words: &[&str], terms: &mut OrderedSet) {
    for token in text.split(|c: char| !c.is_ascii_alphanumeric()) {
        if token.len() < MIN_TERM_LEN {
            continue;
        }
        let token = token.to_lowercase();
        if stop_words.contains(&token.as_str()) {
            continue;
        }
        terms.insert(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FixKind, Priority};
    use crate::config::FederationConfig;
    use crate::federation::LOCAL_BACKEND_ID;
    use crate::logs::error_patterns;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedOracle {
        responses: Mutex<VecDeque<Result<String, String>>>,
    }

    impl ScriptedOracle {
        fn new(responses: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl Oracle for ScriptedOracle {
        async fn generate(&self, _prompt: &str, _max: u32, _temp: f64) -> Result<String> {
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(msg)) => Err(anyhow::anyhow!(msg)),
                None => Ok(String::new()),
            }
        }
    }

    fn analyzer(oracle: Arc<dyn Oracle>) -> IncidentAnalyzer {
        IncidentAnalyzer::new(
            oracle,
            Arc::new(RepoFederation::new(FederationConfig::default())),
        )
    }

    fn scenario_lines() -> Vec<String> {
        vec![
            "[2024-01-15T10:30:00Z] ERROR: database connection timeout".to_string(),
            r#"{"timestamp":"2024-01-15T10:31:00Z","level":"warn","message":"pool shrinking","service":"api"}"#
                .to_string(),
            "completely unstructured noise".to_string(),
        ]
    }

    const VERDICT_JSON: &str = r#"Based on the evidence:
{"rootCause": "database connection pool exhausted", "affectedComponents": ["db", "api"], "confidence": 0.85, "reasoning": "every error references the pool"}"#;

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let analyzer = analyzer(ScriptedOracle::new(vec![Ok(VERDICT_JSON)]));
        let result = analyzer
            .analyze_incident(
                "users getting 500 errors",
                Some(scenario_lines()),
                FeatureFlags::default(),
            )
            .await;

        let batch = result.batch.as_ref().unwrap();
        assert_eq!(batch.total_count, 2);
        assert_eq!(batch.error_count, 1);
        assert_eq!(batch.warn_count, 1);
        let tags = error_patterns(&batch.records);
        assert!(tags.contains(&"connection".to_string()));
        assert!(tags.contains(&"timeout".to_string()));

        assert_eq!(result.verdict.root_cause, "database connection pool exhausted");
        assert_eq!(result.verdict.confidence, 0.85);
        assert!(result.code_analysis.is_none());
        assert!(result.fixes.is_empty());
        assert!(result.tests.is_empty());
    }

    #[tokio::test]
    async fn test_free_text_verdict_degrades() {
        let raw = "The database looks overloaded but I cannot tell for sure.";
        let analyzer = analyzer(ScriptedOracle::new(vec![Ok(raw)]));
        let result = analyzer
            .analyze(AnalysisRequest::new("service is down"))
            .await;

        assert_eq!(result.verdict.root_cause, extract::PARSE_FAILED_ROOT_CAUSE);
        assert_eq!(result.verdict.confidence, extract::DEGRADED_CONFIDENCE);
        assert_eq!(result.verdict.reasoning, raw);
    }

    #[tokio::test]
    async fn test_oracle_transport_failure_still_returns_result() {
        let analyzer = analyzer(ScriptedOracle::new(vec![Err("connect refused")]));
        let result = analyzer
            .analyze(AnalysisRequest::new("service is down"))
            .await;

        assert_eq!(result.verdict.root_cause, extract::DEFAULT_ROOT_CAUSE);
        assert_eq!(result.verdict.confidence, extract::DEGRADED_CONFIDENCE);
        assert!(result.verdict.reasoning.contains("connect refused"));
    }

    #[tokio::test]
    async fn test_fix_fallback_on_unusable_response() {
        let analyzer = analyzer(ScriptedOracle::new(vec![
            Ok(VERDICT_JSON),
            Ok("I recommend being careful."),
        ]));
        let flags = FeatureFlags {
            include_fixes: true,
            ..FeatureFlags::default()
        };
        let result = analyzer
            .analyze(AnalysisRequest::new("500s on checkout").with_flags(flags))
            .await;

        assert_eq!(result.fixes.len(), 1);
        assert_eq!(result.fixes[0].priority, Priority::High);
        assert_eq!(result.fixes[0].kind, FixKind::Code);
        assert!(result.tests.is_empty());
    }

    #[tokio::test]
    async fn test_fixes_and_tests_generated() {
        let fixes_json = r#"[
            {"description": "bound pool size", "priority": "high", "kind": "code", "code": "max(10)", "filePath": "src/db.rs", "explanation": "stops exhaustion"},
            {"description": "raise alert threshold", "priority": "low", "kind": "configuration"}
        ]"#;
        let test_json =
            r#"{"description": "pool refuses extra connections", "code": "assert!(true);"}"#;

        let analyzer = analyzer(ScriptedOracle::new(vec![
            Ok(VERDICT_JSON),
            Ok(fixes_json),
            Ok(test_json),
        ]));
        let flags = FeatureFlags {
            include_fixes: true,
            include_tests: true,
            ..FeatureFlags::default()
        };
        let result = analyzer
            .analyze(AnalysisRequest::new("500s on checkout").with_flags(flags))
            .await;

        assert_eq!(result.fixes.len(), 2);
        assert_eq!(result.fixes[0].id, "fix-1");

        // Only the first fix carries code and a path, so exactly one test.
        assert_eq!(result.tests.len(), 1);
        assert_eq!(result.tests[0].id, "test-1");
        assert_eq!(result.tests[0].fix_id, "fix-1");
        assert_eq!(result.tests[0].framework, "cargo test");
        assert_eq!(result.tests[0].file_path, "src/db.test.rs");
    }

    #[tokio::test]
    async fn test_cancellation_aborts_the_run() {
        let analyzer = analyzer(ScriptedOracle::new(vec![Ok(VERDICT_JSON)]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = analyzer
            .analyze_with_cancellation(AnalysisRequest::new("down"), &cancel)
            .await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_code_search_placeholder_without_backends() {
        let analyzer = analyzer(ScriptedOracle::new(vec![Ok(VERDICT_JSON)]));
        let flags = FeatureFlags {
            include_code_search: true,
            ..FeatureFlags::default()
        };
        let result = analyzer
            .analyze_incident("users getting 500 errors", Some(scenario_lines()), flags)
            .await;

        let analysis = result.code_analysis.unwrap();
        assert!(analysis.backends_used.is_empty());
        assert!(analysis.affected_files.is_empty());
        assert_eq!(analysis.potential_issues.len(), 1);
        assert!(analysis.potential_issues[0].contains("no repository backends connected"));
        assert!(analysis.search_terms.contains(&"database".to_string()));
        assert!(analysis.search_terms.contains(&"pool".to_string()));
    }

    #[tokio::test]
    async fn test_code_search_through_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/pool.rs"),
            "fn acquire() { /* connection pool */ }\n",
        )
        .unwrap();

        let federation = Arc::new(RepoFederation::new(FederationConfig {
            local_root: dir.path().to_path_buf(),
            ..FederationConfig::default()
        }));
        assert!(federation.connect(LOCAL_BACKEND_ID).await);

        let analyzer = IncidentAnalyzer::new(
            ScriptedOracle::new(vec![Ok(VERDICT_JSON)]),
            Arc::clone(&federation),
        );
        let flags = FeatureFlags {
            include_code_search: true,
            ..FeatureFlags::default()
        };
        let result = analyzer
            .analyze_incident("users getting 500 errors", Some(scenario_lines()), flags)
            .await;

        let analysis = result.code_analysis.unwrap();
        assert_eq!(analysis.backends_used, vec![LOCAL_BACKEND_ID]);
        assert!(analysis
            .affected_files
            .iter()
            .any(|path| path.ends_with("pool.rs")));
        assert!(analysis.potential_issues.is_empty());
    }

    #[test]
    fn test_mine_search_terms_caps_and_dedupes() {
        let verdict = Verdict {
            summary: None,
            root_cause: "database connection pool exhausted".to_string(),
            affected_components: Vec::new(),
            confidence: 0.8,
            reasoning: String::new(),
        };
        let batch = LogBatch::from_records(vec![crate::logs::LogRecord::new(
            "",
            crate::logs::LogLevel::Error,
            "connection timeout while calling billing",
        )]);
        let terms = mine_search_terms(&verdict, &batch);
        assert!(terms.len() <= MAX_SEARCH_TERMS);
        assert_eq!(
            terms.iter().filter(|t| t.as_str() == "connection").count(),
            1
        );
        assert!(terms.contains(&"timeout".to_string()));
        assert!(terms.contains(&"billing".to_string()));
        assert!(!terms.contains(&"the".to_string()));
    }

    #[test]
    fn test_degraded_terms_mine_nothing_from_default_root_cause() {
        let verdict = degraded_verdict(&anyhow::anyhow!("boom"));
        let batch = LogBatch::from_records(Vec::new());
        assert!(mine_search_terms(&verdict, &batch).is_empty());
    }

    #[test]
    fn test_parse_failed_root_cause_mines_no_terms() {
        let verdict = extract::parse_verdict("the oracle rambled with no structure");
        assert_eq!(verdict.root_cause, extract::PARSE_FAILED_ROOT_CAUSE);
        let batch = LogBatch::from_records(Vec::new());
        assert!(mine_search_terms(&verdict, &batch).is_empty());
    }
}
