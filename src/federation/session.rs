//! Capability surface shared by every repository backend.
//!
//! Sessions are polymorphic over one capability set so the federation can
//! dispatch uniformly. Capabilities a backend does not really implement must
//! still answer with empty values instead of erroring; only `connect` and
//! `search_code` carry real behavior on the hosted backends.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// One match from a code search, tagged with the backend that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSearchHit {
    pub path: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u64>,
    pub origin_backend: String,
}

/// Descriptive metadata about the repository behind a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryInfo {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl RepositoryInfo {
    /// Placeholder used by backends that do not expose repository metadata.
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            description: None,
            language: None,
        }
    }
}

/// Live connection to one repository backend.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Lightweight handshake proving the backend is reachable with the
    /// configured credentials. An empty credential fails here, at request
    /// time, not at construction time.
    async fn connect(&self) -> Result<()>;

    /// Release any held resources. Safe to call more than once.
    async fn disconnect(&self) -> Result<()>;

    async fn list_files(&self, path: Option<&str>) -> Result<Vec<String>>;

    async fn read_file(&self, path: &str) -> Result<String>;

    async fn search_code(&self, query: &str) -> Result<Vec<CodeSearchHit>>;

    async fn repository_info(&self) -> Result<RepositoryInfo>;
}

const MAX_ERROR_BODY_LEN: usize = 200;

/// Truncate an API error body and redact it entirely when it looks like it
/// could echo credentials back.
pub(crate) fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &["token", "secret", "password", "credential", "bearer"];

    let truncated = if body.chars().count() > MAX_ERROR_BODY_LEN {
        format!("{} (truncated)", crate::util::truncate(body, MAX_ERROR_BODY_LEN))
    } else {
        body.to_string()
    };

    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(error details redacted)".to_string();
        }
    }

    truncated
}
