use crate::client::{OrchestratorTransport, PipelineRunClient};
use crate::dashboard_state::{DashboardState, RunGuardError};
use crate::poll_loop::{drive_poll_loop, PollLoopExit, PollScheduler, RunEventSink};
use crate::poller::{PollConfig, PollOutcome, RunStatusPoller};
use chrono::{DateTime, Utc};
use srrm_core::run_contracts::TriggerOutcome;
use srrm_core::FailureKind;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub enum RunReport {
    /// The trigger did not lead to a watched run: a no-op, a rejection, a
    /// transport failure, or an accepted run the caller chose not to follow.
    Triggered(TriggerOutcome),
    Finished { run_id: String, outcome: PollOutcome },
    Cancelled { run_id: String, attempts: u32 },
}

impl RunReport {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            RunReport::Triggered(TriggerOutcome::Failed { .. }) => Some(FailureKind::Upstream),
            RunReport::Triggered(TriggerOutcome::TransportError { .. }) => {
                Some(FailureKind::Transport)
            }
            RunReport::Triggered(_) => None,
            RunReport::Finished { outcome, .. } => outcome.failure_kind(),
            RunReport::Cancelled { .. } => None,
        }
    }

    /// One-line description for operators. Timeouts are never worded as
    /// failures.
    pub fn summary(&self) -> String {
        match self {
            RunReport::Triggered(TriggerOutcome::Accepted { run_id, .. }) => {
                format!("Pipeline run {run_id} accepted")
            }
            RunReport::Triggered(TriggerOutcome::BenignNoOp { message }) => {
                format!("Nothing to predict: {message}")
            }
            RunReport::Triggered(TriggerOutcome::Failed { status, message }) => {
                format!("Trigger rejected (HTTP {status}): {message}")
            }
            RunReport::Triggered(TriggerOutcome::TransportError { message }) => {
                format!("Orchestrator unreachable: {message}")
            }
            RunReport::Finished { run_id, outcome } => match outcome {
                PollOutcome::Success(_) => format!("Pipeline run {run_id} completed"),
                PollOutcome::Failed(run) => {
                    format!("Pipeline run {run_id} failed: {}", run.detail)
                }
                PollOutcome::TimedOut {
                    attempts,
                    last_state,
                } => format!(
                    "Stopped watching run {run_id} after {attempts} checks; last state {}. It may still complete",
                    last_state
                        .as_ref()
                        .map(|state| state.as_str())
                        .unwrap_or("unknown")
                ),
                PollOutcome::PollError {
                    attempts,
                    last_error,
                } => format!(
                    "Could not read status of run {run_id} in {attempts} attempts: {last_error}"
                ),
            },
            RunReport::Cancelled { run_id, attempts } => {
                format!("Stopped watching run {run_id} after {attempts} checks")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source: String,
    pub triggered_at: DateTime<Utc>,
    pub poll: PollConfig,
    /// Follow an accepted run until it reaches a terminal state.
    pub watch: bool,
}

impl RunRequest {
    pub fn new(source: impl Into<String>, triggered_at: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            triggered_at,
            poll: PollConfig::default(),
            watch: true,
        }
    }
}

/// Trigger, then watch. The run guard in `state` is held for the whole
/// sequence and released with the final report.
pub async fn run_pipeline<T, Sch, Snk>(
    client: &PipelineRunClient<T>,
    scheduler: &Sch,
    sink: &mut Snk,
    state: &mut DashboardState,
    request: RunRequest,
    shutdown: watch::Receiver<bool>,
) -> Result<RunReport, RunGuardError>
where
    T: OrchestratorTransport,
    Sch: PollScheduler,
    Snk: RunEventSink,
{
    state.begin_run(request.triggered_at)?;

    let outcome = client
        .trigger(&request.source, request.triggered_at)
        .await;
    let report = match outcome {
        TriggerOutcome::Accepted { ref run_id, .. } if request.watch => {
            let run_id = run_id.clone();
            state.attach_run_id(run_id.clone());
            let mut poller = RunStatusPoller::new(run_id.clone(), request.poll);
            match drive_poll_loop(&mut poller, client, scheduler, sink, shutdown).await {
                PollLoopExit::Finished(outcome) => RunReport::Finished { run_id, outcome },
                PollLoopExit::Cancelled { attempts } => RunReport::Cancelled { run_id, attempts },
            }
        }
        other => RunReport::Triggered(other),
    };

    state.complete_run(report.clone());
    Ok(report)
}
