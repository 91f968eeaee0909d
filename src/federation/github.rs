//! Hosted GitHub backend.
//!
//! Talks to the REST API directly. The handshake hits `/user`; code search
//! uses the text-match media type so hits carry a snippet fragment.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::session::{sanitize_error_body, BackendSession, CodeSearchHit, RepositoryInfo};

const API_ROOT: &str = "https://api.github.com";
const API_TIMEOUT_SECS: u64 = 30;
const SEARCH_PAGE_SIZE: &str = "10";
const USER_AGENT: &str = "triage";

pub struct GithubSession {
    backend_id: String,
    http: reqwest::Client,
    token: String,
}

impl GithubSession {
    /// An empty token is accepted here; the handshake will fail with 401
    /// instead, keeping credential problems a connect-time condition.
    pub fn new(backend_id: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            backend_id: backend_id.into(),
            http,
            token: token.into(),
        })
    }

    fn get(&self, url: &str, accept: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header("Accept", accept)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28")
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    path: String,
    repository: ItemRepository,
    #[serde(default)]
    text_matches: Vec<TextMatch>,
}

#[derive(Deserialize)]
struct ItemRepository {
    full_name: String,
}

#[derive(Deserialize)]
struct TextMatch {
    fragment: Option<String>,
}

#[async_trait]
impl BackendSession for GithubSession {
    async fn connect(&self) -> Result<()> {
        let response = self
            .get(&format!("{}/user", API_ROOT), "application/vnd.github+json")
            .send()
            .await
            .context("GitHub handshake failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "GitHub handshake returned {}: {}",
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
            .get(
                &format!("{}/search/code", API_ROOT),
                "application/vnd.github.text-match+json",
            )
            .query(&[("q", query), ("per_page", SEARCH_PAGE_SIZE)])
            .send()
            .await
            .context("GitHub code search failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "GitHub code search returned {}: {}",
                status,
                sanitize_error_body(&body)
            );
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("failed to parse GitHub search response")?;

        Ok(parsed
            .items
            .into_iter()
            .map(|item| CodeSearchHit {
                path: item.path,
                snippet: item
                    .text_matches
                    .into_iter()
                    .find_map(|m| m.fragment)
                    .unwrap_or_default(),
                repository: Some(item.repository.full_name),
                line_number: None,
                origin_backend: self.backend_id.clone(),
            })
            .collect())
    }

    async fn repository_info(&self) -> Result<RepositoryInfo> {
        Ok(RepositoryInfo::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_response_with_fragments() {
        let json = r#"{
            "items": [
                {
                    "path": "src/db/pool.rs",
                    "repository": {"full_name": "acme/api"},
                    "text_matches": [{"fragment": "pool.acquire().await"}]
                },
                {
                    "path": "src/lib.rs",
                    "repository": {"full_name": "acme/api"}
                }
            ]
        }"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].path, "src/db/pool.rs");
        assert_eq!(
            parsed.items[0].text_matches[0].fragment.as_deref(),
            Some("pool.acquire().await")
        );
        assert!(parsed.items[1].text_matches.is_empty());
    }

    #[test]
    fn test_empty_token_is_accepted_at_construction() {
        assert!(GithubSession::new("github", "").is_ok());
    }
}
