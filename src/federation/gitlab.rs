//! Hosted GitLab backend.
//!
//! Uses the v4 REST API against gitlab.com or a self-hosted instance. Blob
//! search results already carry the matching lines and a start line, so hits
//! here are richer than the GitHub ones.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::session::{sanitize_error_body, BackendSession, CodeSearchHit, RepositoryInfo};

const API_TIMEOUT_SECS: u64 = 30;
const SEARCH_PAGE_SIZE: &str = "10";

pub struct GitlabSession {
    backend_id: String,
    http: reqwest::Client,
    host: String,
    token: String,
}

impl GitlabSession {
    pub fn new(
        backend_id: impl Into<String>,
        host: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            backend_id: backend_id.into(),
            http,
            host: host.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        // Personal access tokens go in PRIVATE-TOKEN, not Authorization.
        self.http
            .get(format!("{}{}", self.host, path))
            .header("PRIVATE-TOKEN", self.token.as_str())
    }
}

#[derive(Deserialize)]
struct BlobResult {
    path: String,
    #[serde(default)]
    data: String,
    #[serde(default)]
    project_id: Option<u64>,
    #[serde(default)]
    startline: Option<u64>,
}

#[async_trait]
impl BackendSession for GitlabSession {
    async fn connect(&self) -> Result<()> {
        let response = self
            .get("/api/v4/user")
            .send()
            .await
            .context("GitLab handshake failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "GitLab handshake returned {}: {}",
                status,
                sanitize_error_body(&body)
            );
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn list_files(&self, _path: Option<&str>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn read_file(&self, _path: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn search_code(&self, query: &str) -> Result<Vec<CodeSearchHit>> {
        let response = self
            .get("/api/v4/search")
            .query(&[
                ("scope", "blobs"),
                ("search", query),
                ("per_page", SEARCH_PAGE_SIZE),
            ])
            .send()
            .await
            .context("GitLab blob search failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "GitLab blob search returned {}: {}",
                status,
                sanitize_error_body(&body)
            );
        }

        let blobs: Vec<BlobResult> = response
            .json()
            .await
            .context("failed to parse GitLab search response")?;

        Ok(blobs
            .into_iter()
            .map(|blob| CodeSearchHit {
                path: blob.path,
                snippet: blob.data,
                repository: blob.project_id.map(|id| id.to_string()),
                line_number: blob.startline,
                origin_backend: self.backend_id.clone(),
            })
            .collect())
    }

    async fn repository_info(&self) -> Result<RepositoryInfo> {
        Ok(RepositoryInfo::empty())
    }
}
