//! Incident analysis: request and result types, oracle-output parsing, and
//! the orchestrator that ties evidence, verdict, code search, and fix/test
//! generation together.

pub mod extract;
pub mod orchestrator;
pub mod prompts;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::logs::LogBatch;

pub use orchestrator::IncidentAnalyzer;

/// How urgently a fix should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// What kind of change a fix asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FixKind {
    Code,
    Configuration,
    Infrastructure,
}

impl FixKind {
    pub fn label(&self) -> &'static str {
        match self {
            FixKind::Code => "code",
            FixKind::Configuration => "configuration",
            FixKind::Infrastructure => "infrastructure",
        }
    }
}

/// Which optional phases an analysis should run.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureFlags {
    pub include_fixes: bool,
    pub include_tests: bool,
    pub include_code_search: bool,
}

/// One analysis request. Built by the caller, consumed once.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub narrative: String,
    pub batch: Option<LogBatch>,
    pub flags: FeatureFlags,
}

impl AnalysisRequest {
    pub fn new(narrative: impl Into<String>) -> Self {
        Self {
            narrative: narrative.into(),
            batch: None,
            flags: FeatureFlags::default(),
        }
    }

    pub fn with_batch(mut self, batch: LogBatch) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_flags(mut self, flags: FeatureFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Structured root-cause conclusion. Always fully populated; parsing
/// substitutes defaults rather than leaving holes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub root_cause: String,
    pub affected_components: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
}

/// One suggested remediation, identified positionally at generation time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub id: String,
    pub description: String,
    pub priority: Priority,
    pub kind: FixKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub explanation: String,
}

/// Generated test coverage for exactly one fix.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub fix_id: String,
    pub description: String,
    pub framework: String,
    pub code: String,
    pub file_path: String,
}

/// Outcome of the optional code-search phase.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeAnalysis {
    pub search_terms: Vec<String>,
    pub affected_files: Vec<String>,
    pub backends_used: Vec<String>,
    pub potential_issues: Vec<String>,
}

/// The assembled analysis. Every field is populated on every path;
/// `code_analysis` is absent only when the feature flag was off.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<LogBatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_analysis: Option<CodeAnalysis>,
    pub fixes: Vec<Fix>,
    pub tests: Vec<TestCase>,
}

impl AnalysisResult {
    pub(crate) fn assemble(
        verdict: Verdict,
        batch: Option<LogBatch>,
        code_analysis: Option<CodeAnalysis>,
        fixes: Vec<Fix>,
        tests: Vec<TestCase>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            verdict,
            batch,
            code_analysis,
            fixes,
            tests,
        }
    }
}
