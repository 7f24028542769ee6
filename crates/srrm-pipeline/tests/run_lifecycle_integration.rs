use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use srrm_core::gateway::RecordGateway;
use srrm_core::run_contracts::TriggerOutcome;
use srrm_core::{FailureKind, PredictionRecord, RiskCategory};
use srrm_pipeline::{
    run_pipeline, DashboardState, HttpReply, OrchestratorConfig, OrchestratorTransport,
    PipelineRunClient, PollConfig, PollOutcome, PollScheduler, RefreshOnSuccess, RunGuardError,
    RunReport, RunRequest, TransportFault,
};
use srrm_storage::RecordStore;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::watch;
use url::Url;

fn ts(offset_minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0)
        .single()
        .expect("valid timestamp")
        + Duration::minutes(offset_minutes)
}

#[derive(Default)]
struct ScriptedOrchestrator {
    trigger_replies: Mutex<VecDeque<HttpReply>>,
    status_replies: Mutex<VecDeque<Result<HttpReply, TransportFault>>>,
    posts: Mutex<Vec<String>>,
    gets: Mutex<Vec<String>>,
}

impl ScriptedOrchestrator {
    fn new(trigger: HttpReply, statuses: Vec<Result<HttpReply, TransportFault>>) -> Self {
        Self {
            trigger_replies: Mutex::new(VecDeque::from([trigger])),
            status_replies: Mutex::new(statuses.into()),
            posts: Mutex::new(Vec::new()),
            gets: Mutex::new(Vec::new()),
        }
    }
}

impl OrchestratorTransport for ScriptedOrchestrator {
    async fn post_json(&self, url: &Url, _body: &Value) -> Result<HttpReply, TransportFault> {
        self.posts.lock().expect("posts lock").push(url.to_string());
        self.trigger_replies
            .lock()
            .expect("trigger lock")
            .pop_front()
            .ok_or_else(|| TransportFault::new("unexpected trigger"))
    }

    async fn get(&self, url: &Url) -> Result<HttpReply, TransportFault> {
        self.gets.lock().expect("gets lock").push(url.to_string());
        self.status_replies
            .lock()
            .expect("status lock")
            .pop_front()
            .unwrap_or_else(|| Ok(status("running")))
    }
}

struct InstantScheduler;

impl PollScheduler for InstantScheduler {
    async fn sleep(&self, _delay: std::time::Duration) {}
}

fn status(state: &str) -> HttpReply {
    HttpReply::new(
        200,
        format!(r#"{{"dag_run_id": "manual__run", "state": "{state}"}}"#),
    )
}

fn accepted() -> HttpReply {
    HttpReply::new(200, r#"{"dag_run_id": "manual__run", "state": "queued"}"#)
}

fn client(orchestrator: ScriptedOrchestrator) -> PipelineRunClient<ScriptedOrchestrator> {
    PipelineRunClient::new(orchestrator, OrchestratorConfig::default()).expect("valid api base")
}

fn seeded_store() -> RecordStore {
    let store = RecordStore::open_in_memory().expect("open db");
    store
        .insert_predictions(&[
            PredictionRecord::new("S1", ts(-60), "Low").with_probabilities(Some(0.1), None, None),
            PredictionRecord::new("S1", ts(5), "High Risk")
                .with_probabilities(Some(0.82), Some(0.1), Some(0.08)),
            PredictionRecord::new("S2", ts(5), "medium")
                .with_probabilities(Some(0.35), Some(0.5), Some(0.15)),
        ])
        .expect("seed predictions");
    store
}

#[tokio::test]
async fn trigger_poll_and_refresh_since_trigger_time() {
    let store = seeded_store();
    let client = client(ScriptedOrchestrator::new(
        accepted(),
        vec![
            Ok(status("queued")),
            Err(TransportFault::new("connection reset")),
            Ok(status("running")),
            Ok(status("success")),
        ],
    ));
    let mut state = DashboardState::new();
    let mut sink = RefreshOnSuccess::new(&store, ts(0));
    let (_cancel, shutdown) = watch::channel(false);

    let report = run_pipeline(
        &client,
        &InstantScheduler,
        &mut sink,
        &mut state,
        RunRequest::new("cli", ts(0)),
        shutdown,
    )
    .await
    .expect("no run in progress");

    match &report {
        RunReport::Finished {
            run_id,
            outcome: PollOutcome::Success(_),
        } => assert_eq!(run_id, "manual__run"),
        other => panic!("unexpected report: {other:?}"),
    }
    assert_eq!(report.failure_kind(), None);
    assert_eq!(client.transport().posts.lock().expect("lock").len(), 1);
    assert_eq!(client.transport().gets.lock().expect("lock").len(), 4);

    let refreshed = sink.refreshed().expect("refresh ran");
    assert_eq!(refreshed.predictions.len(), 2);
    assert_eq!(refreshed.aggregate.distinct_entities, 2);
    assert_eq!(
        refreshed.aggregate.majority_by_entity["S1"],
        RiskCategory::High
    );
    assert_eq!(refreshed.aggregate.top_high_risk[0].entity_id, "S1");
    assert!(sink.error().is_none());

    assert!(!state.is_run_active());
    assert_eq!(state.last_report(), Some(&report));
}

#[tokio::test]
async fn no_new_rows_skips_polling() {
    let store = seeded_store();
    let client = client(ScriptedOrchestrator::new(
        HttpReply::new(400, r#"{"detail": "No new rows to predict"}"#),
        Vec::new(),
    ));
    let mut state = DashboardState::new();
    let mut sink = RefreshOnSuccess::new(&store, ts(0));
    let (_cancel, shutdown) = watch::channel(false);

    let report = run_pipeline(
        &client,
        &InstantScheduler,
        &mut sink,
        &mut state,
        RunRequest::new("cli", ts(0)),
        shutdown,
    )
    .await
    .expect("no run in progress");

    assert!(matches!(
        report,
        RunReport::Triggered(TriggerOutcome::BenignNoOp { .. })
    ));
    assert_eq!(report.failure_kind(), None);
    assert!(client.transport().gets.lock().expect("lock").is_empty());
    assert!(sink.refreshed().is_none());
}

#[tokio::test]
async fn timeout_is_reported_apart_from_failure() {
    let store = seeded_store();
    let client = client(ScriptedOrchestrator::new(accepted(), Vec::new()));
    let mut state = DashboardState::new();
    let mut sink = RefreshOnSuccess::new(&store, ts(0));
    let (_cancel, shutdown) = watch::channel(false);
    let request = RunRequest {
        poll: PollConfig {
            max_attempts: 3,
            ..PollConfig::default()
        },
        ..RunRequest::new("cli", ts(0))
    };

    let report = run_pipeline(
        &client,
        &InstantScheduler,
        &mut sink,
        &mut state,
        request,
        shutdown,
    )
    .await
    .expect("no run in progress");

    assert_eq!(report.failure_kind(), Some(FailureKind::Timeout));
    assert!(report.summary().contains("after 3 checks"));
    assert!(!report.summary().contains("failed"));
    assert!(sink.refreshed().is_none());
    assert_eq!(client.transport().gets.lock().expect("lock").len(), 3);
}

#[tokio::test]
async fn active_run_refuses_new_trigger() {
    let store = seeded_store();
    let client = client(ScriptedOrchestrator::new(accepted(), Vec::new()));
    let mut state = DashboardState::new();
    state.begin_run(ts(-1)).expect("first run");
    let mut sink = RefreshOnSuccess::new(&store, ts(0));
    let (_cancel, shutdown) = watch::channel(false);

    let err = run_pipeline(
        &client,
        &InstantScheduler,
        &mut sink,
        &mut state,
        RunRequest::new("cli", ts(0)),
        shutdown,
    )
    .await
    .expect_err("guarded");

    assert!(matches!(err, RunGuardError::RunInProgress { .. }));
    assert!(client.transport().posts.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn run_lock_held_by_another_state_refuses_trigger() {
    let dir = tempfile::tempdir().expect("temp dir");
    let lock_path = dir.path().join("srrm.run.lock");
    let mut holder = DashboardState::with_run_lock(&lock_path);
    holder.begin_run(ts(-1)).expect("holder run");

    let store = seeded_store();
    let client = client(ScriptedOrchestrator::new(accepted(), Vec::new()));
    let mut state = DashboardState::with_run_lock(&lock_path);
    let mut sink = RefreshOnSuccess::new(&store, ts(0));
    let (_cancel, shutdown) = watch::channel(false);

    let err = run_pipeline(
        &client,
        &InstantScheduler,
        &mut sink,
        &mut state,
        RunRequest::new("cli", ts(0)),
        shutdown,
    )
    .await
    .expect_err("locked");

    assert_eq!(
        err,
        RunGuardError::RunInProgress {
            run_id: None,
            triggered_at: ts(-1),
        }
    );
    assert!(client.transport().posts.lock().expect("lock").is_empty());
}
