//! `cohort` binary: runs the orchestrator from a TOML config.

use clap::{Parser, Subcommand};
use cohort_orchestrator::{CohortConfig, Orchestrator, TickLoop};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cohort", about = "Cohort — subagent orchestration engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "cohort.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator until Ctrl-C
    Serve {
        /// Read newline-delimited JSON commands and queries from stdin and
        /// write one JSON response per line to stdout
        #[arg(long)]
        stdin: bool,
    },
    /// Validate the config and print the seed agents
    Check,
    /// Print the suggested priority and capabilities for a task
    Classify {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
}

fn load_config(path: &Path) -> anyhow::Result<CohortConfig> {
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return Ok(CohortConfig::default());
    }
    Ok(CohortConfig::load(path)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { stdin } => serve(config, stdin).await,
        Commands::Check => {
            let orchestrator = Orchestrator::from_config(config).await?;
            let agents = orchestrator.list_agents(&Default::default()).await;
            let summary = serde_json::json!({
                "config": cli.config.display().to_string(),
                "dispatch_mode": orchestrator.config().dispatch_mode,
                "tick_interval_ms": orchestrator.config().tick_interval_ms,
                "agents": agents,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Classify { title, description } => {
            let orchestrator = Orchestrator::new(config.orchestrator)?;
            let classification = orchestrator.classify(&title, &description);
            println!("{}", serde_json::to_string_pretty(&classification)?);
            Ok(())
        }
    }
}

async fn serve(config: CohortConfig, read_stdin: bool) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config).await?;
    let agents = orchestrator.list_agents(&Default::default()).await;
    info!(
        agents = agents.len(),
        tick_interval_ms = orchestrator.config().tick_interval_ms,
        "Starting Cohort orchestrator"
    );

    let mut events = orchestrator.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(event = %json, "Orchestrator event"),
                    Err(e) => warn!(error = %e, "Failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event log lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let ticker = TickLoop::new(orchestrator.clone()).start();

    let requests = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if !read_stdin {
                return;
            }
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        let response = orchestrator.handle_json(&line).await;
                        println!("{response}");
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
            info!("Stdin closed, no more requests");
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    ticker.abort();
    requests.abort();
    event_log.abort();

    let snapshot = orchestrator.performance_snapshot().await;
    info!(
        completed = snapshot.completed_task_count,
        failed = snapshot.failed_task_count,
        efficiency = snapshot.overall_efficiency,
        "Final performance"
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_load_config_from_borrowed_path() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let content = "[[agents]]\nname = \"w\"\nrole = \"worker\"";
        writeln!(tmp.as_file_mut(), "{content}").unwrap();
        let path: &Path = tmp.path();
        let config = load_config(path).unwrap();
        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.agents[0].name, "w");
    }
}
