use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mender::agent::claude::ClaudeProposer;
use mender::config::AppConfig;
use mender::workflow::run_repair;

#[derive(Parser)]
#[command(name = "mender", about = "Iteratively repair a buggy program with Claude")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Read the buggy program from this file instead of the config
    #[arg(long)]
    code: Option<PathBuf>,

    /// Natural-language description of the intended behaviour
    #[arg(long)]
    docstring: Option<String>,

    /// Print the full run report as JSON instead of just the code
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the result
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(path) = &cli.code {
        config.task.buggy_code = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
    }
    if let Some(docstring) = cli.docstring {
        config.task.docstring = Some(docstring);
    }

    tracing::info!(model = %config.claude.model, "Starting Mender");

    let proposer = Arc::new(ClaudeProposer::from_config(&config.claude));

    let report = tokio::select! {
        report = run_repair(&config, proposer) => report?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Received Ctrl+C, aborting run");
            anyhow::bail!("interrupted");
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.candidate_code);
    }

    if !report.passed {
        tracing::warn!(iterations = report.iterations, "Candidate still fails its tests");
    }

    Ok(())
}
