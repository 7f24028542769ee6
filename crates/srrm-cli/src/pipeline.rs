use crate::config::AppConfig;
use crate::views::print_aggregate;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use serde_json::json;
use srrm_core::gateway::RecordGateway;
use srrm_pipeline::{
    run_pipeline, DashboardState, HttpTransport, PipelineRunClient, RefreshOnSuccess, RunRequest,
    TokioScheduler,
};
use srrm_storage::RecordStore;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct TriggerArgs {
    /// Return after the trigger instead of following the run
    #[arg(long)]
    pub no_wait: bool,
    /// Caller recorded in the run's conf payload
    #[arg(long, default_value = "cli")]
    pub source: String,
}

fn client(config: &AppConfig) -> Result<PipelineRunClient<HttpTransport>> {
    PipelineRunClient::over_http(config.orchestrator.clone())
        .context("Failed to create orchestrator client")
}

pub async fn trigger(config: &AppConfig, store: &RecordStore, args: &TriggerArgs) -> Result<()> {
    let client = client(config)?;
    let triggered_at = Utc::now();
    let mut state = DashboardState::with_run_lock(config.run_lock_path());
    let mut sink = RefreshOnSuccess::new(store, triggered_at);

    // Ctrl-C stops the watch loop; the run itself keeps going remotely.
    // The sender must outlive the loop, a dropped sender also cancels it.
    let (cancel, shutdown) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = cancel.send(true);
            }
            Err(err) => {
                warn!(event = "interrupt_handler_unavailable", error = %err);
                std::future::pending::<()>().await;
            }
        }
    });

    let request = RunRequest {
        poll: config.poll,
        watch: !args.no_wait,
        ..RunRequest::new(args.source.clone(), triggered_at)
    };
    let result = run_pipeline(
        &client,
        &TokioScheduler,
        &mut sink,
        &mut state,
        request,
        shutdown,
    )
    .await;
    interrupt.abort();
    let report = result?;

    if let Some(refreshed) = sink.refreshed() {
        state.record_aggregate(refreshed.aggregate.clone());
    }

    if config.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "summary": report.summary(),
                "failure_kind": report.failure_kind(),
                "refreshed": state.latest_aggregate(),
            }))?
        );
    } else {
        println!("{}", report.summary());
        if let Some(aggregate) = state.latest_aggregate() {
            println!();
            println!("Predictions since trigger:");
            print_aggregate(aggregate);
        }
    }
    if let Some(err) = sink.error() {
        warn!(event = "trigger_refresh_error", error = %err);
    }

    match report.failure_kind() {
        Some(kind) => bail!("pipeline run ended with {kind} error"),
        None => Ok(()),
    }
}

pub async fn status(config: &AppConfig, run_id: &str) -> Result<()> {
    let client = client(config)?;
    let run = client
        .run_status(run_id)
        .await
        .with_context(|| format!("Failed to read status of run {run_id}"))?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&run.detail)?);
        return Ok(());
    }
    println!("Run:     {}", run.run_id);
    println!("State:   {}", run.state);
    if let Some(started) = run.started_at {
        println!("Started: {}", started.to_rfc3339());
    }
    if let Some(ended) = run.ended_at {
        println!("Ended:   {}", ended.to_rfc3339());
    }
    Ok(())
}

pub async fn health(config: &AppConfig, store: &RecordStore) -> Result<()> {
    let store_health = store.health();
    let orchestrator_health = client(config)?.health().await;
    info!(
        event = "health_checked",
        store = store_health.reachable,
        orchestrator = orchestrator_health.reachable
    );

    if config.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "store": store_health,
                "orchestrator": orchestrator_health,
            }))?
        );
    } else {
        let describe = |reachable: bool, code: Option<u16>| {
            let label = if reachable { "ok" } else { "unreachable" };
            match code {
                Some(code) => format!("{label} (HTTP {code})"),
                None => label.to_string(),
            }
        };
        println!(
            "Record store: {}",
            describe(store_health.reachable, store_health.status_code)
        );
        println!(
            "Orchestrator: {}",
            describe(orchestrator_health.reachable, orchestrator_health.status_code)
        );
    }

    if !store_health.reachable || !orchestrator_health.reachable {
        bail!("one or more collaborators are unreachable");
    }
    Ok(())
}
