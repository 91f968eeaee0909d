//! The text-completion oracle behind every analysis verdict.
//!
//! The orchestrator only sees the [`Oracle`] trait; the production
//! implementation speaks the OpenRouter-style chat-completions protocol.
//! Transport failures surface as errors here and are absorbed into the
//! degraded-success paths by the caller, never shown to end users raw.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::util::truncate;

/// Token budget forwarded on every oracle call.
pub const DEFAULT_MAX_TOKENS: u32 = 4000;
/// Low temperature keeps verdicts close to the evidence.
pub const DEFAULT_TEMPERATURE: f64 = 0.1;

const REQUEST_TIMEOUT_SECS: u64 = 60;
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 2;
const BACKOFF_MULTIPLIER: u64 = 2;

/// Free-form text completion over an evidence prompt.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Produce raw completion text. The caller owns all interpretation of the
    /// result, including the case where it is not the JSON it asked for.
    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f64) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

/// Chat-completions client for OpenRouter-compatible endpoints.
pub struct CompletionClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

impl CompletionClient {
    /// Build a client. An empty API key is the one precondition rejected up
    /// front; everything later degrades instead of failing the analysis.
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            anyhow::bail!("no oracle API key configured; set OPENROUTER_API_KEY");
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
            model: model.into(),
            api_key,
        })
    }

    fn backoff_secs(&self, response: &reqwest::Response, attempt: u32) -> u64 {
        // Honor a Retry-After header when the service sends one.
        if let Some(secs) = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        {
            if secs > 0 && secs < 300 {
                return secs;
            }
        }
        INITIAL_BACKOFF_SECS * BACKOFF_MULTIPLIER.pow(attempt)
    }
}

#[async_trait]
impl Oracle for CompletionClient {
    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f64) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
            temperature,
            stream: false,
        };

        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await
                .context("oracle request failed")?;

            let status = response.status();
            if status.is_success() {
                let parsed: ChatResponse = response
                    .json()
                    .await
                    .context("failed to parse oracle response")?;
                return Ok(parsed
                    .choices
                    .first()
                    .map(|c| c.message.content.clone())
                    .unwrap_or_default());
            }

            if status.as_u16() == 429 && attempt < MAX_RETRIES {
                let wait = self.backoff_secs(&response, attempt);
                attempt += 1;
                warn!(wait_secs = wait, attempt, "oracle rate limited, retrying");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("oracle returned {}: {}", status, truncate(&body, 200));
        }
    }
}
