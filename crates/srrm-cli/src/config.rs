use clap::Args;
use srrm_pipeline::client::{DEFAULT_API_BASE, DEFAULT_CREDENTIAL, DEFAULT_PIPELINE_ID};
use srrm_pipeline::poller::{DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use srrm_pipeline::{OrchestratorConfig, PollConfig};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "srrm.db";

/// Settings shared by every subcommand. Each flag falls back to an
/// environment variable; `.env` is loaded before parsing.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(long, global = true, env = "SRRM_DB_PATH", default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,
    #[arg(long, global = true, env = "ORCHESTRATOR_API", default_value = DEFAULT_API_BASE)]
    pub orchestrator_api: String,
    #[arg(long, global = true, env = "ORCHESTRATOR_USER", default_value = DEFAULT_CREDENTIAL)]
    pub orchestrator_user: String,
    #[arg(
        long,
        global = true,
        env = "ORCHESTRATOR_PASS",
        default_value = DEFAULT_CREDENTIAL,
        hide_env_values = true
    )]
    pub orchestrator_pass: String,
    #[arg(long, global = true, env = "ORCHESTRATOR_PIPELINE", default_value = DEFAULT_PIPELINE_ID)]
    pub pipeline: String,
    #[arg(long, global = true, env = "SRRM_POLL_INITIAL_DELAY_SECS", default_value_t = DEFAULT_INITIAL_DELAY.as_secs())]
    pub poll_initial_delay_secs: u64,
    #[arg(long, global = true, env = "SRRM_POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    pub poll_interval_secs: u64,
    #[arg(
        long,
        global = true,
        env = "SRRM_POLL_MAX_ATTEMPTS",
        default_value_t = DEFAULT_MAX_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub poll_max_attempts: u32,
    #[arg(long, global = true, env = "SRRM_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    /// Print results as JSON instead of text.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub orchestrator: OrchestratorConfig,
    pub poll: PollConfig,
    pub debug: bool,
    pub json: bool,
}

impl AppConfig {
    pub fn from_args(args: &ConfigArgs) -> Self {
        Self {
            db_path: args.db_path.clone(),
            orchestrator: OrchestratorConfig {
                api_base: args.orchestrator_api.clone(),
                username: args.orchestrator_user.clone(),
                password: args.orchestrator_pass.clone(),
                pipeline_id: args.pipeline.clone(),
                request_timeout: args.request_timeout_secs.map(Duration::from_secs),
            },
            poll: PollConfig {
                initial_delay: Duration::from_secs(args.poll_initial_delay_secs),
                interval: Duration::from_secs(args.poll_interval_secs),
                max_attempts: args.poll_max_attempts,
            },
            debug: args.debug,
            json: args.json,
        }
    }

    /// Lock file shared by every process using the same record store.
    pub fn run_lock_path(&self) -> PathBuf {
        self.db_path.with_extension("run.lock")
    }
}
