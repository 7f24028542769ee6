//! Run status poller as an explicit state machine. It never sleeps or does
//! I/O itself: [`RunStatusPoller::start`] and [`RunStatusPoller::observe`]
//! return the next step, and the driver in `poll_loop` carries it out.

use crate::client::StatusFetchError;
use serde::Serialize;
use srrm_core::run_contracts::{OrchestratorRunState, RunState};
use srrm_core::FailureKind;
use std::time::Duration;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    NotStarted,
    Queued,
    Running,
    Success,
    Failed,
    TimedOut,
    PollError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Success(RunState),
    Failed(RunState),
    TimedOut {
        attempts: u32,
        last_state: Option<OrchestratorRunState>,
    },
    PollError {
        attempts: u32,
        last_error: String,
    },
}

impl PollOutcome {
    pub fn phase(&self) -> PollPhase {
        match self {
            PollOutcome::Success(_) => PollPhase::Success,
            PollOutcome::Failed(_) => PollPhase::Failed,
            PollOutcome::TimedOut { .. } => PollPhase::TimedOut,
            PollOutcome::PollError { .. } => PollPhase::PollError,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            PollOutcome::Success(_) => None,
            PollOutcome::Failed(_) => Some(FailureKind::Upstream),
            PollOutcome::TimedOut { .. } => Some(FailureKind::Timeout),
            PollOutcome::PollError { .. } => Some(FailureKind::Transport),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    Wait(Duration),
    Done(PollOutcome),
}

#[derive(Debug, Clone)]
pub struct RunStatusPoller {
    run_id: String,
    config: PollConfig,
    phase: PollPhase,
    attempts: u32,
    faults: u32,
    last_state: Option<OrchestratorRunState>,
    last_error: Option<String>,
    outcome: Option<PollOutcome>,
}

impl RunStatusPoller {
    pub fn new(run_id: impl Into<String>, config: PollConfig) -> Self {
        Self {
            run_id: run_id.into(),
            config,
            phase: PollPhase::NotStarted,
            attempts: 0,
            faults: 0,
            last_state: None,
            last_error: None,
            outcome: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn outcome(&self) -> Option<&PollOutcome> {
        self.outcome.as_ref()
    }

    /// Called once after an accepted trigger. The first check waits for the
    /// initial delay.
    pub fn start(&mut self) -> PollStep {
        if let Some(outcome) = &self.outcome {
            return PollStep::Done(outcome.clone());
        }
        if self.phase == PollPhase::NotStarted {
            self.phase = PollPhase::Queued;
            return PollStep::Wait(self.config.initial_delay);
        }
        PollStep::Wait(self.config.interval)
    }

    /// Feeds one status check result. The first terminal outcome is kept;
    /// later observations are ignored.
    pub fn observe(&mut self, result: Result<RunState, StatusFetchError>) -> PollStep {
        if let Some(outcome) = &self.outcome {
            return PollStep::Done(outcome.clone());
        }
        if self.phase == PollPhase::NotStarted {
            self.phase = PollPhase::Queued;
        }
        self.attempts += 1;

        match result {
            Ok(run) => {
                self.last_state = Some(run.state.clone());
                match run.state {
                    OrchestratorRunState::Success => return self.finish(PollOutcome::Success(run)),
                    OrchestratorRunState::Failed => return self.finish(PollOutcome::Failed(run)),
                    OrchestratorRunState::Queued => self.phase = PollPhase::Queued,
                    OrchestratorRunState::Running => self.phase = PollPhase::Running,
                    OrchestratorRunState::Other(_) => {}
                }
            }
            Err(err) => {
                self.faults += 1;
                self.last_error = Some(err.to_string());
            }
        }

        if self.attempts >= self.config.max_attempts {
            let outcome = if self.faults == self.attempts {
                PollOutcome::PollError {
                    attempts: self.attempts,
                    last_error: self.last_error.clone().unwrap_or_default(),
                }
            } else {
                PollOutcome::TimedOut {
                    attempts: self.attempts,
                    last_state: self.last_state.clone(),
                }
            };
            return self.finish(outcome);
        }
        PollStep::Wait(self.config.interval)
    }

    fn finish(&mut self, outcome: PollOutcome) -> PollStep {
        self.phase = outcome.phase();
        self.outcome = Some(outcome.clone());
        PollStep::Done(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn run(state: &str) -> Result<RunState, StatusFetchError> {
        Ok(RunState {
            run_id: "run-1".to_string(),
            state: OrchestratorRunState::parse(state),
            started_at: None,
            ended_at: None,
            detail: Value::Null,
        })
    }

    fn fault() -> Result<RunState, StatusFetchError> {
        Err(StatusFetchError::Transport("connection reset".to_string()))
    }

    fn config(max_attempts: u32) -> PollConfig {
        PollConfig {
            max_attempts,
            ..PollConfig::default()
        }
    }

    #[test]
    fn start_waits_for_initial_delay_then_interval() {
        let mut poller = RunStatusPoller::new(
            "run-1",
            PollConfig {
                initial_delay: Duration::from_secs(2),
                interval: Duration::from_secs(7),
                max_attempts: 5,
            },
        );
        assert_eq!(poller.phase(), PollPhase::NotStarted);
        assert_eq!(poller.start(), PollStep::Wait(Duration::from_secs(2)));
        assert_eq!(poller.phase(), PollPhase::Queued);
        assert_eq!(poller.observe(run("running")), PollStep::Wait(Duration::from_secs(7)));
        assert_eq!(poller.phase(), PollPhase::Running);
    }

    #[test]
    fn queued_queued_running_success_takes_four_checks() {
        let mut poller = RunStatusPoller::new("run-1", PollConfig::default());
        poller.start();
        for state in ["queued", "queued", "running"] {
            assert!(matches!(poller.observe(run(state)), PollStep::Wait(_)));
        }
        let step = poller.observe(run("success"));
        assert!(matches!(step, PollStep::Done(PollOutcome::Success(_))));
        assert_eq!(poller.attempts(), 4);
        assert_eq!(poller.phase(), PollPhase::Success);
    }

    #[test]
    fn running_forever_times_out_after_budget() {
        let mut poller = RunStatusPoller::new("run-1", PollConfig::default());
        let mut last = poller.start();
        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            last = poller.observe(run("running"));
        }
        assert_eq!(
            last,
            PollStep::Done(PollOutcome::TimedOut {
                attempts: DEFAULT_MAX_ATTEMPTS,
                last_state: Some(OrchestratorRunState::Running),
            })
        );
        assert_eq!(poller.phase(), PollPhase::TimedOut);
    }

    #[test]
    fn faults_share_the_attempt_budget() {
        let mut poller = RunStatusPoller::new("run-1", config(3));
        poller.start();
        assert!(matches!(poller.observe(fault()), PollStep::Wait(_)));
        assert!(matches!(poller.observe(run("running")), PollStep::Wait(_)));
        let step = poller.observe(fault());
        assert!(matches!(
            step,
            PollStep::Done(PollOutcome::TimedOut { attempts: 3, .. })
        ));
    }

    #[test]
    fn only_faults_end_in_poll_error() {
        let mut poller = RunStatusPoller::new("run-1", config(2));
        poller.start();
        poller.observe(fault());
        match poller.observe(fault()) {
            PollStep::Done(outcome) => {
                assert_eq!(outcome.phase(), PollPhase::PollError);
                assert_eq!(outcome.failure_kind(), Some(FailureKind::Transport));
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn fault_then_success_recovers() {
        let mut poller = RunStatusPoller::new("run-1", config(5));
        poller.start();
        poller.observe(fault());
        assert!(matches!(
            poller.observe(run("success")),
            PollStep::Done(PollOutcome::Success(_))
        ));
    }

    #[test]
    fn first_terminal_state_is_authoritative() {
        let mut poller = RunStatusPoller::new("run-1", PollConfig::default());
        poller.start();
        poller.observe(run("failed"));
        let again = poller.observe(run("success"));
        assert!(matches!(again, PollStep::Done(PollOutcome::Failed(_))));
        assert_eq!(poller.attempts(), 1);
        assert_eq!(
            poller.outcome().and_then(PollOutcome::failure_kind),
            Some(FailureKind::Upstream)
        );
    }

    #[test]
    fn unknown_states_keep_polling() {
        let mut poller = RunStatusPoller::new("run-1", config(3));
        poller.start();
        assert!(matches!(
            poller.observe(run("up_for_retry")),
            PollStep::Wait(_)
        ));
        assert_eq!(poller.phase(), PollPhase::Queued);
    }
}
