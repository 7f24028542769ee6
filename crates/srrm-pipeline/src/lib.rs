pub mod client;
pub mod dashboard_state;
pub mod error;
pub mod lifecycle;
pub mod poll_loop;
pub mod poller;
pub mod refresh;
pub mod run_lock;

pub use client::{
    classify_trigger_response, HttpReply, HttpTransport, OrchestratorConfig,
    OrchestratorTransport, PipelineRunClient, StatusFetchError, TransportFault,
};
pub use dashboard_state::{ActiveRun, DashboardState, RunGuardError};
pub use error::PipelineError;
pub use lifecycle::{run_pipeline, RunReport, RunRequest};
pub use poll_loop::{
    drive_poll_loop, spawn_poll_loop, NoopSink, PollHandle, PollLoopExit, PollScheduler,
    RunEventSink, RunStatusSource, TokioScheduler,
};
pub use poller::{PollConfig, PollOutcome, PollPhase, PollStep, RunStatusPoller};
pub use refresh::{RefreshOnSuccess, RefreshedPredictions};
pub use run_lock::RunLock;
