//! Configuration for triage.
//!
//! Settings live in ~/.config/triage/config.json. Environment variables
//! override the file, and credentials come from the environment only; they
//! are never written to disk.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_ORACLE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_ORACLE_MODEL: &str = "anthropic/claude-sonnet-4.5";
const DEFAULT_GITLAB_HOST: &str = "https://gitlab.com";

/// Endpoint, model and credentials for the analysis oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub url: String,
    pub model: String,
    /// Never persisted; OPENROUTER_API_KEY is the only source.
    #[serde(skip)]
    pub api_key: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ORACLE_URL.to_string(),
            model: DEFAULT_ORACLE_MODEL.to_string(),
            api_key: String::new(),
        }
    }
}

/// Hosts, credentials and the local index root for the repository backends.
/// Missing tokens stay empty; the hosted backends reject the connection
/// handshake rather than this layer failing early.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Never persisted; GITHUB_TOKEN is the only source.
    #[serde(skip)]
    pub github_token: String,
    /// Never persisted; GITLAB_TOKEN is the only source.
    #[serde(skip)]
    pub gitlab_token: String,
    pub gitlab_host: String,
    pub local_root: PathBuf,
    pub local_languages: Vec<String>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            github_token: String::new(),
            gitlab_token: String::new(),
            gitlab_host: DEFAULT_GITLAB_HOST.to_string(),
            local_root: PathBuf::from("."),
            local_languages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub oracle: OracleConfig,
    pub federation: FederationConfig,
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("triage"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk when present, then layer the environment on
    /// top. Never fails; a broken file is backed up and replaced by
    /// defaults.
    pub fn load() -> Self {
        let mut config = Self::from_disk();
        config.apply_env(|name| env::var(name).ok());
        config
    }

    fn from_disk() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        let Ok(content) = fs::read_to_string(&path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(&path, &content);
                warn!(error = %err, "config file was corrupted; backup saved, defaults loaded");
                Self::default()
            }
        }
    }

    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        override_string(&mut self.oracle.url, get("TRIAGE_ORACLE_URL"));
        override_string(&mut self.oracle.model, get("TRIAGE_ORACLE_MODEL"));
        override_string(&mut self.oracle.api_key, get("OPENROUTER_API_KEY"));
        override_string(&mut self.federation.github_token, get("GITHUB_TOKEN"));
        override_string(&mut self.federation.gitlab_token, get("GITLAB_TOKEN"));
        override_string(&mut self.federation.gitlab_host, get("GITLAB_HOST"));
        if let Some(root) = get("TRIAGE_LOCAL_REPO").filter(|v| !v.is_empty()) {
            self.federation.local_root = PathBuf::from(root);
        }
        if let Some(csv) = get("TRIAGE_LOCAL_LANGUAGES").filter(|v| !v.is_empty()) {
            self.federation.local_languages = parse_languages(&csv);
        }
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/triage/config.json".to_string())
    }
}

fn override_string(target: &mut String, value: Option<String>) {
    if let Some(value) = value {
        if !value.is_empty() {
            *target = value;
        }
    }
}

/// Comma-separated language list, lowercased with blanks dropped.
pub(crate) fn parse_languages(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
