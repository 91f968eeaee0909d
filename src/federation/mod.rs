//! Registry of repository backends and query fan-out across them.
//!
//! The federation owns the authoritative connection state for every backend.
//! Handshakes report success as a boolean instead of erroring, fan-out search
//! isolates per-backend failures as diagnostics, and registry mutation is
//! serialized behind one async lock.

pub mod github;
pub mod gitlab;
pub mod local;
pub mod session;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::FederationConfig;
use github::GithubSession;
use gitlab::GitlabSession;
use local::LocalIndexSession;
pub use session::{BackendSession, CodeSearchHit, RepositoryInfo};

pub const GITHUB_BACKEND_ID: &str = "github";
pub const GITLAB_BACKEND_ID: &str = "gitlab";
pub const LOCAL_BACKEND_ID: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    GitHub,
    GitLab,
    LocalIndex,
}

impl BackendKind {
    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::GitHub => "github",
            BackendKind::GitLab => "gitlab",
            BackendKind::LocalIndex => "local-index",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Registry entry describing one backend. The `config` map carries only
/// non-secret settings; credentials stay inside [`FederationConfig`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryHandle {
    pub id: String,
    pub name: String,
    pub kind: BackendKind,
    pub config: BTreeMap<String, String>,
    pub state: ConnectionState,
}

/// One backend's failure during fan-out, preserved as a diagnostic.
#[derive(Debug, Clone)]
pub struct BackendFailure {
    pub backend_id: String,
    pub error: String,
}

/// Merged outcome of a fan-out search. Never an error: zero connected
/// backends simply produces an empty report.
#[derive(Debug, Clone, Default)]
pub struct SearchReport {
    pub hits: Vec<CodeSearchHit>,
    pub backends_used: Vec<String>,
    pub failures: Vec<BackendFailure>,
}

struct Entry {
    handle: RepositoryHandle,
    session: Option<Arc<dyn BackendSession>>,
}

/// The backend registry plus its live-session cache.
pub struct RepoFederation {
    config: FederationConfig,
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl RepoFederation {
    /// Register the three default backends, all disconnected. Configuration
    /// is passed in explicitly; nothing global is consulted here.
    pub fn new(config: FederationConfig) -> Self {
        let mut entries = BTreeMap::new();

        entries.insert(
            GITHUB_BACKEND_ID.to_string(),
            Entry {
                handle: RepositoryHandle {
                    id: GITHUB_BACKEND_ID.to_string(),
                    name: "GitHub".to_string(),
                    kind: BackendKind::GitHub,
                    config: BTreeMap::new(),
                    state: ConnectionState::Disconnected,
                },
                session: None,
            },
        );

        let mut gitlab_cfg = BTreeMap::new();
        gitlab_cfg.insert("host".to_string(), config.gitlab_host.clone());
        entries.insert(
            GITLAB_BACKEND_ID.to_string(),
            Entry {
                handle: RepositoryHandle {
                    id: GITLAB_BACKEND_ID.to_string(),
                    name: "GitLab".to_string(),
                    kind: BackendKind::GitLab,
                    config: gitlab_cfg,
                    state: ConnectionState::Disconnected,
                },
                session: None,
            },
        );

        let mut local_cfg = BTreeMap::new();
        local_cfg.insert("root".to_string(), config.local_root.display().to_string());
        local_cfg.insert("languages".to_string(), config.local_languages.join(","));
        entries.insert(
            LOCAL_BACKEND_ID.to_string(),
            Entry {
                handle: RepositoryHandle {
                    id: LOCAL_BACKEND_ID.to_string(),
                    name: "Local Index".to_string(),
                    kind: BackendKind::LocalIndex,
                    config: local_cfg,
                    state: ConnectionState::Disconnected,
                },
                session: None,
            },
        );

        Self {
            config,
            entries: Mutex::new(entries),
        }
    }

    fn build_session(&self, id: &str, kind: BackendKind) -> Result<Arc<dyn BackendSession>> {
        Ok(match kind {
            BackendKind::GitHub => {
                Arc::new(GithubSession::new(id, self.config.github_token.clone())?)
            }
            BackendKind::GitLab => Arc::new(GitlabSession::new(
                id,
                self.config.gitlab_host.clone(),
                self.config.gitlab_token.clone(),
            )?),
            BackendKind::LocalIndex => Arc::new(LocalIndexSession::new(
                id,
                self.config.local_root.clone(),
                self.config.local_languages.clone(),
            )),
        })
    }

    /// Handshake with one backend. Returns whether the backend ended up
    /// connected; failures are logged, never propagated. Holding the registry
    /// lock across the handshake serializes concurrent connects.
    pub async fn connect(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(id) else {
            warn!(backend = id, "connect requested for unknown backend");
            return false;
        };
        if entry.handle.state == ConnectionState::Connected {
            return true;
        }

        let session = match self.build_session(id, entry.handle.kind) {
            Ok(session) => session,
            Err(err) => {
                warn!(backend = id, error = %err, "could not build backend session");
                return false;
            }
        };

        match session.connect().await {
            Ok(()) => {
                entry.session = Some(session);
                entry.handle.state = ConnectionState::Connected;
                info!(backend = id, "backend connected");
                true
            }
            Err(err) => {
                warn!(backend = id, error = %err, "backend handshake failed");
                false
            }
        }
    }

    /// Tear down a backend's session. No-op when already disconnected or the
    /// id is unknown.
    pub async fn disconnect(&self, id: &str) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(id) else {
            debug!(backend = id, "disconnect requested for unknown backend");
            return;
        };
        if let Some(session) = entry.session.take() {
            if let Err(err) = session.disconnect().await {
                debug!(backend = id, error = %err, "session teardown reported an error");
            }
        }
        entry.handle.state = ConnectionState::Disconnected;
    }

    /// Query a single backend. Unlike fan-out, a targeted search is allowed
    /// to fail: unknown ids, disconnected backends, and backend errors all
    /// surface to the caller.
    pub async fn search_backend(&self, id: &str, query: &str) -> Result<Vec<CodeSearchHit>> {
        let session = self.live_session(id).await?;
        session.search_code(query).await
    }

    /// Query every connected backend concurrently and merge the results.
    /// Hits are concatenated in registry order and re-stamped with their
    /// origin backend; per-backend failures become diagnostics.
    pub async fn search_all(&self, query: &str) -> SearchReport {
        let sessions: Vec<(String, Arc<dyn BackendSession>)> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter_map(|(id, entry)| match &entry.session {
                    Some(session) if entry.handle.state == ConnectionState::Connected => {
                        Some((id.clone(), Arc::clone(session)))
                    }
                    _ => None,
                })
                .collect()
        };

        let searches = sessions.into_iter().map(|(id, session)| {
            let query = query.to_string();
            async move {
                let outcome = session.search_code(&query).await;
                (id, outcome)
            }
        });

        let mut report = SearchReport::default();
        for (id, outcome) in future::join_all(searches).await {
            match outcome {
                Ok(mut hits) => {
                    for hit in &mut hits {
                        hit.origin_backend = id.clone();
                    }
                    report.hits.extend(hits);
                    report.backends_used.push(id);
                }
                Err(err) => {
                    warn!(backend = %id, error = %err, "backend search failed");
                    report.failures.push(BackendFailure {
                        backend_id: id,
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Repository metadata from one connected backend.
    pub async fn repository_info(&self, id: &str) -> Result<RepositoryInfo> {
        let session = self.live_session(id).await?;
        session.repository_info().await
    }

    /// Snapshot of every registered handle, in id order.
    pub async fn list_all(&self) -> Vec<RepositoryHandle> {
        let entries = self.entries.lock().await;
        entries.values().map(|entry| entry.handle.clone()).collect()
    }

    /// Ids of the currently connected backends, in id order.
    pub async fn list_connected(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|entry| entry.handle.state == ConnectionState::Connected)
            .map(|entry| entry.handle.id.clone())
            .collect()
    }

    async fn live_session(&self, id: &str) -> Result<Arc<dyn BackendSession>> {
        let entries = self.entries.lock().await;
        let entry = entries
            .get(id)
            .with_context(|| format!("unknown backend '{}'", id))?;
        if entry.handle.state != ConnectionState::Connected {
            anyhow::bail!("backend '{}' is not connected", id);
        }
        entry
            .session
            .clone()
            .with_context(|| format!("backend '{}' has no live session", id))
    }
}
