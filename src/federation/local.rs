//! Local working-copy backend.
//!
//! Searches a checked-out repository on disk with a plain substring scan,
//! filtered to source files of the configured languages. The scan runs on a
//! blocking task so large trees do not stall the async runtime.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use walkdir::WalkDir;

use super::session::{BackendSession, CodeSearchHit, RepositoryInfo};
use crate::util::truncate;

const MAX_HITS: usize = 50;
const MAX_FILE_BYTES: u64 = 1024 * 1024;
const SNIPPET_CHARS: usize = 200;

const DEFAULT_EXTENSIONS: &[&str] = &[
    "rs", "js", "jsx", "mjs", "ts", "tsx", "py", "go", "java", "kt", "rb", "c", "h", "cpp", "cs",
    "php",
];

pub struct LocalIndexSession {
    backend_id: String,
    root: PathBuf,
    extensions: Vec<String>,
    languages: Vec<String>,
}

impl LocalIndexSession {
    pub fn new(backend_id: impl Into<String>, root: PathBuf, languages: Vec<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            extensions: extensions_for(&languages),
            root,
            languages,
        }
    }
}

/// Source-file extensions for the configured language list. An empty or
/// unrecognized list falls back to a broad default set.
fn extensions_for(languages: &[String]) -> Vec<String> {
    let mut extensions = Vec::new();
    for language in languages {
        let exts: &[&str] = match language.trim().to_lowercase().as_str() {
            "rust" => &["rs"],
            "javascript" => &["js", "jsx", "mjs", "cjs"],
            "typescript" => &["ts", "tsx"],
            "python" => &["py", "pyi"],
            "go" => &["go"],
            "java" => &["java"],
            "kotlin" => &["kt"],
            "ruby" => &["rb"],
            "c" => &["c", "h"],
            "cpp" | "c++" => &["cpp", "cc", "hpp"],
            "csharp" | "c#" => &["cs"],
            "php" => &["php"],
            _ => &[],
        };
        extensions.extend(exts.iter().map(|e| e.to_string()));
    }
    if extensions.is_empty() {
        extensions = DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect();
    }
    extensions
}

fn is_ignored(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    let ignored = [
        "target",
        "node_modules",
        ".git",
        ".svn",
        ".hg",
        "dist",
        "build",
        "__pycache__",
        ".pytest_cache",
        "vendor",
        ".idea",
        ".vscode",
    ];

    ignored.contains(&name) || name.starts_with('.')
}

/// Walk the tree and collect substring matches, capped at `MAX_HITS`.
fn scan_tree(
    root: &Path,
    extensions: &[String],
    query: &str,
    backend_id: &str,
) -> Vec<CodeSearchHit> {
    let needle = query.to_lowercase();
    let repo_name = root
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string());
    let mut hits = Vec::new();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.path() == root || !is_ignored(e.path()))
        .filter_map(|e| e.ok())
    {
        if hits.len() >= MAX_HITS {
            break;
        }
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !extensions.iter().any(|allowed| allowed == ext) {
            continue;
        }
        if entry
            .metadata()
            .map(|m| m.len() > MAX_FILE_BYTES)
            .unwrap_or(true)
        {
            continue;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => continue,
        };

        let rel = path.strip_prefix(root).unwrap_or(path);
        for (idx, line) in content.lines().enumerate() {
            if line.to_lowercase().contains(&needle) {
                hits.push(CodeSearchHit {
                    path: rel.display().to_string(),
                    snippet: truncate(line.trim(), SNIPPET_CHARS),
                    repository: repo_name.clone(),
                    line_number: Some(idx as u64 + 1),
                    origin_backend: backend_id.to_string(),
                });
                if hits.len() >= MAX_HITS {
                    break;
                }
            }
        }
    }

    hits
}

#[async_trait]
impl BackendSession for LocalIndexSession {
    async fn connect(&self) -> Result<()> {
        if !self.root.is_dir() {
            anyhow::bail!("local index root {} is not a directory", self.root.display());
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
        let root = self.root.clone();
        let extensions = self.extensions.clone();
        let query = query.to_string();
        let backend_id = self.backend_id.clone();

        tokio::task::spawn_blocking(move || scan_tree(&root, &extensions, &query, &backend_id))
            .await
            .context("local search task failed")
    }

    async fn repository_info(&self) -> Result<RepositoryInfo> {
        let name = self
            .root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("local")
            .to_string();

        // A git checkout gives us the canonical remote URL; a bare directory
        // still gets a file:// url.
        let url = git2::Repository::discover(&self.root)
            .ok()
            .and_then(|repo| {
                repo.find_remote("origin")
                    .ok()
                    .and_then(|remote| remote.url().map(|u| u.to_string()))
            })
            .unwrap_or_else(|| format!("file://{}", self.root.display()));

        Ok(RepositoryInfo {
            name,
            url,
            description: None,
            language: self.languages.first().cloned(),
        })
    }
}
