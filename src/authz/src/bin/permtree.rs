//! Permission tree operator CLI
//!
//! Builds an in-memory engine from a TOML seed document and runs one
//! command against it. Results are printed as JSON on stdout; logs go to
//! stderr.

use anyhow::{Context, Result};
use clap::Parser;
use permtree_authz::seed::SeedDocument;
use permtree_authz::{AuthorizationEngine, EngineConfig, InMemoryRoleAssignments, InMemoryRolePermissionStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Permission tree authorization CLI
#[derive(Parser)]
#[command(name = "permtree")]
#[command(about = "Inspect and check a hierarchical permission tree")]
#[command(version)]
struct Cli {
    /// Path to engine configuration file
    #[arg(short, long, env = "PERMTREE_CONFIG")]
    config: Option<PathBuf>,

    /// Path to seed document
    #[arg(short, long, env = "PERMTREE_SEED")]
    seed: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Check permissions for a principal
    Check {
        principal: String,
        #[arg(required = true)]
        permissions: Vec<String>,
    },

    /// Print the active permission tree
    Tree,

    /// Expand the wildcard grants of a principal
    Expand { principal: String },

    /// Verify derived levels and paths
    Verify,
}

#[derive(Serialize)]
struct VerifyReport {
    nodes: usize,
    violations: Vec<permtree_authz::tree::IntegrityViolation>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("warn,permtree_authz={}", log_level).into()),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => EngineConfig::default(),
    };

    let document = SeedDocument::load(&cli.seed)
        .with_context(|| format!("Failed to load seed from {:?}", cli.seed))?;

    let assignments = InMemoryRoleAssignments::new();
    let engine = AuthorizationEngine::new(
        config,
        Arc::new(InMemoryRolePermissionStore::new()),
        Arc::new(assignments.clone()),
    )?;

    let summary = document
        .apply(&engine, &assignments)
        .await
        .context("Failed to apply seed document")?;
    info!(?summary, "Engine ready");

    let output = match cli.command {
        Command::Check {
            principal,
            permissions,
        } => serde_json::to_string_pretty(&engine.batch_check(&principal, &permissions).await?)?,
        Command::Tree => serde_json::to_string_pretty(&engine.get_tree(None).await?)?,
        Command::Expand { principal } => {
            serde_json::to_string_pretty(&engine.expand_wildcards(&principal).await?)?
        }
        Command::Verify => {
            let report = VerifyReport {
                nodes: engine.list_nodes(true).await.len(),
                violations: engine.verify_integrity().await,
            };
            let failed = !report.violations.is_empty();
            println!("{}", serde_json::to_string_pretty(&report)?);
            if failed {
                anyhow::bail!("{} integrity violations", report.violations.len());
            }
            return Ok(());
        }
    };

    println!("{}", output);
    Ok(())
}
