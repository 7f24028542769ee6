mod config;
mod pipeline;
mod transfer;
mod views;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{AppConfig, ConfigArgs};
use srrm_storage::RecordStore;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "srrm")]
#[command(about = "Supplier risk pipeline and analytics", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Validate a metric snapshot CSV and store it as unscored rows
    Ingest { path: PathBuf },
    /// Trigger the prediction pipeline and follow the run
    Trigger(pipeline::TriggerArgs),
    /// Show the orchestrator's state for one run
    Status { run_id: String },
    Overview,
    Predictions(views::PredictionArgs),
    Snapshots(views::SnapshotArgs),
    /// Feature contributions behind an entity's latest prediction
    Explain { entity: String },
    ExplainSummary(views::ExplainSummaryArgs),
    Events,
    Export(transfer::ExportArgs),
    Health,
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("SRRM_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };
    let filter = if debug {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_store(config: &AppConfig) -> Result<RecordStore> {
    RecordStore::open(&config.db_path)
        .with_context(|| format!("Failed to open record store at {}", config.db_path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::from_args(&cli.config);
    init_logging(config.debug);
    debug!(
        event = "srrm_cli_start",
        db_path = %config.db_path.display(),
        orchestrator = %config.orchestrator.api_base
    );

    match cli.command {
        Commands::Ingest { path } => transfer::ingest(&config, &open_store(&config)?, &path),
        Commands::Trigger(args) => pipeline::trigger(&config, &open_store(&config)?, &args).await,
        Commands::Status { run_id } => pipeline::status(&config, &run_id).await,
        Commands::Overview => views::overview(&config, &open_store(&config)?),
        Commands::Predictions(args) => views::predictions(&config, &open_store(&config)?, &args),
        Commands::Snapshots(args) => views::snapshots(&config, &open_store(&config)?, &args),
        Commands::Explain { entity } => views::explain(&config, &open_store(&config)?, &entity),
        Commands::ExplainSummary(args) => {
            views::explain_summary(&config, &open_store(&config)?, &args)
        }
        Commands::Events => views::events(&config, &open_store(&config)?),
        Commands::Export(args) => transfer::export(&open_store(&config)?, &args),
        Commands::Health => pipeline::health(&config, &open_store(&config)?).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "srrm",
            "--db-path",
            "/tmp/risk.db",
            "--poll-max-attempts",
            "3",
            "trigger",
            "--no-wait",
        ])
        .expect("parse");
        let config = AppConfig::from_args(&cli.config);
        assert_eq!(config.db_path, PathBuf::from("/tmp/risk.db"));
        assert_eq!(config.poll.max_attempts, 3);
        assert_eq!(config.run_lock_path(), PathBuf::from("/tmp/risk.run.lock"));
        match cli.command {
            Commands::Trigger(args) => assert!(args.no_wait),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn zero_attempt_budget_is_rejected() {
        assert!(Cli::try_parse_from(["srrm", "--poll-max-attempts", "0", "overview"]).is_err());
    }
}
