use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use triage::analysis::{AnalysisResult, FeatureFlags, IncidentAnalyzer};
use triage::config::Config;
use triage::federation::RepoFederation;
use triage::logs::error_patterns;
use triage::oracle::CompletionClient;
use triage::util::truncate;

#[derive(Parser, Debug)]
#[command(
    name = "triage",
    about = "Root-cause analysis for production incidents",
    version
)]
struct Args {
    /// What happened, in plain words
    narrative: String,

    /// Path to a raw log capture to classify and fold into the evidence
    #[arg(short, long)]
    logs: Option<PathBuf>,

    /// Suggest fixes for the root cause
    #[arg(long)]
    fixes: bool,

    /// Generate test cases for the suggested fixes (implies --fixes)
    #[arg(long)]
    tests: bool,

    /// Search connected repository backends for affected code
    #[arg(long)]
    code_search: bool,

    /// Repository backends to connect before analysis (github, gitlab, local)
    #[arg(long = "connect", value_name = "BACKEND")]
    connect: Vec<String>,

    /// Emit the full analysis as JSON instead of a readable summary
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("triage=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();

    let oracle = Arc::new(CompletionClient::new(
        config.oracle.url.clone(),
        config.oracle.model.clone(),
        config.oracle.api_key.clone(),
    )?);
    let federation = Arc::new(RepoFederation::new(config.federation.clone()));

    for id in &args.connect {
        if federation.connect(id).await {
            match federation.repository_info(id).await {
                Ok(repo) => info!(backend = %id, repository = %repo.name, "backend connected"),
                Err(err) => {
                    warn!(backend = %id, error = %err, "connected, but repository info unavailable")
                }
            }
        } else {
            warn!(backend = %id, "backend connection failed; continuing without it");
        }
    }

    let raw_lines = match &args.logs {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read log file {}", path.display()))?;
            Some(content.lines().map(str::to_string).collect())
        }
        None => None,
    };

    let flags = FeatureFlags {
        include_fixes: args.fixes || args.tests,
        include_tests: args.tests,
        include_code_search: args.code_search,
    };

    let analyzer = IncidentAnalyzer::new(oracle, federation);
    let result = analyzer
        .analyze_incident(&args.narrative, raw_lines, flags)
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_readable(&result);
    }

    Ok(())
}

fn print_readable(result: &AnalysisResult) {
    println!();
    println!("Analysis {}", result.id);
    println!();
    println!("Verdict");
    println!("  root cause: {}", result.verdict.root_cause);
    if let Some(summary) = &result.verdict.summary {
        println!("  summary:    {}", summary);
    }
    println!("  confidence: {:.0}%", result.verdict.confidence * 100.0);
    if !result.verdict.affected_components.is_empty() {
        println!(
            "  components: {}",
            result.verdict.affected_components.join(", ")
        );
    }
    println!("  reasoning:  {}", truncate(&result.verdict.reasoning, 300));

    if let Some(batch) = &result.batch {
        println!();
        println!("Log evidence");
        println!(
            "  {} records ({} errors, {} warnings)",
            batch.total_count, batch.error_count, batch.warn_count
        );
        let patterns = error_patterns(&batch.records);
        if !patterns.is_empty() {
            println!("  patterns: {}", patterns.join(", "));
        }
    }

    if let Some(analysis) = &result.code_analysis {
        println!();
        println!("Code search");
        println!("  terms:    {}", analysis.search_terms.join(", "));
        if !analysis.backends_used.is_empty() {
            println!("  backends: {}", analysis.backends_used.join(", "));
        }
        for file in &analysis.affected_files {
            println!("  - {}", file);
        }
        for issue in &analysis.potential_issues {
            println!("  ! {}", issue);
        }
    }

    if !result.fixes.is_empty() {
        println!();
        println!("Suggested fixes");
        for fix in &result.fixes {
            println!(
                "  [{}] ({}, {}) {}",
                fix.id,
                fix.priority.label(),
                fix.kind.label(),
                fix.description
            );
            if let Some(path) = &fix.file_path {
                println!("      file: {}", path);
            }
        }
    }

    if !result.tests.is_empty() {
        println!();
        println!("Suggested tests");
        for test in &result.tests {
            println!("  [{}] ({}) {}", test.id, test.framework, test.description);
        }
    }
    println!();
}
