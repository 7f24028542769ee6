use crate::client::{OrchestratorTransport, PipelineRunClient, StatusFetchError};
use crate::error::PipelineError;
use crate::poller::{PollOutcome, PollStep, RunStatusPoller};
use srrm_core::run_contracts::RunState;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub trait PollScheduler: Send + Sync {
    fn sleep(&self, delay: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl PollScheduler for TokioScheduler {
    fn sleep(&self, delay: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(delay)
    }
}

pub trait RunStatusSource: Send + Sync {
    fn fetch_status(
        &self,
        run_id: &str,
    ) -> impl Future<Output = Result<RunState, StatusFetchError>> + Send;
}

impl<T: OrchestratorTransport> RunStatusSource for PipelineRunClient<T> {
    async fn fetch_status(&self, run_id: &str) -> Result<RunState, StatusFetchError> {
        self.run_status(run_id).await
    }
}

/// Receives the terminal classification of a watched run, exactly once.
pub trait RunEventSink {
    fn on_success(&mut self, run: &RunState);

    fn on_failure(&mut self, _run: &RunState) {}

    fn on_timeout(&mut self, _attempts: u32) {}

    fn on_poll_error(&mut self, _attempts: u32, _last_error: &str) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl RunEventSink for NoopSink {
    fn on_success(&mut self, _run: &RunState) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollLoopExit {
    Finished(PollOutcome),
    Cancelled { attempts: u32 },
}

/// Runs `future` unless the shutdown flag is raised or its sender is dropped
/// first.
async fn unless_cancelled<F>(future: F, shutdown: &mut watch::Receiver<bool>) -> Option<F::Output>
where
    F: Future,
{
    tokio::pin!(future);
    loop {
        if *shutdown.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
            output = &mut future => return Some(output),
        }
    }
}

fn dispatch<S: RunEventSink>(sink: &mut S, outcome: &PollOutcome) {
    match outcome {
        PollOutcome::Success(run) => sink.on_success(run),
        PollOutcome::Failed(run) => sink.on_failure(run),
        PollOutcome::TimedOut { attempts, .. } => sink.on_timeout(*attempts),
        PollOutcome::PollError {
            attempts,
            last_error,
        } => sink.on_poll_error(*attempts, last_error),
    }
}

/// Advances `poller` until it reaches a terminal state or the loop is
/// cancelled. A cancelled loop issues no further status checks and never
/// reaches the sink.
pub async fn drive_poll_loop<Src, Sch, Snk>(
    poller: &mut RunStatusPoller,
    source: &Src,
    scheduler: &Sch,
    sink: &mut Snk,
    mut shutdown: watch::Receiver<bool>,
) -> PollLoopExit
where
    Src: RunStatusSource,
    Sch: PollScheduler,
    Snk: RunEventSink,
{
    let mut step = poller.start();
    loop {
        let delay = match step {
            PollStep::Done(outcome) => {
                log_outcome(poller.run_id(), &outcome);
                dispatch(sink, &outcome);
                return PollLoopExit::Finished(outcome);
            }
            PollStep::Wait(delay) => delay,
        };

        if unless_cancelled(scheduler.sleep(delay), &mut shutdown)
            .await
            .is_none()
        {
            return cancelled(poller);
        }
        let Some(result) = unless_cancelled(source.fetch_status(poller.run_id()), &mut shutdown).await
        else {
            return cancelled(poller);
        };

        match &result {
            Ok(run) => debug!(
                event = "run_status_checked",
                run_id = %poller.run_id(),
                attempt = poller.attempts() + 1,
                state = %run.state
            ),
            Err(err) => warn!(
                event = "run_status_fault",
                run_id = %poller.run_id(),
                attempt = poller.attempts() + 1,
                error = %err
            ),
        }
        step = poller.observe(result);
    }
}

fn cancelled(poller: &RunStatusPoller) -> PollLoopExit {
    info!(
        event = "run_poll_cancelled",
        run_id = %poller.run_id(),
        attempts = poller.attempts()
    );
    PollLoopExit::Cancelled {
        attempts: poller.attempts(),
    }
}

fn log_outcome(run_id: &str, outcome: &PollOutcome) {
    match outcome {
        PollOutcome::Success(_) => info!(event = "run_succeeded", run_id = %run_id),
        PollOutcome::Failed(run) => {
            warn!(event = "run_failed", run_id = %run_id, detail = %run.detail)
        }
        PollOutcome::TimedOut {
            attempts,
            last_state,
        } => warn!(
            event = "run_poll_timed_out",
            run_id = %run_id,
            attempts,
            last_state = last_state.as_ref().map(|state| state.as_str()).unwrap_or("none")
        ),
        PollOutcome::PollError {
            attempts,
            last_error,
        } => warn!(
            event = "run_poll_error",
            run_id = %run_id,
            attempts,
            error = %last_error
        ),
    }
}

/// Owns a background poll loop. Dropping the handle cancels the loop.
pub struct PollHandle<S> {
    cancel: watch::Sender<bool>,
    join: Option<JoinHandle<(PollLoopExit, S)>>,
}

impl<S> PollHandle<S> {
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Waits for the loop and hands back its sink.
    pub async fn join(mut self) -> Result<(PollLoopExit, S), PipelineError> {
        let join = self
            .join
            .take()
            .ok_or_else(|| PipelineError::Join("poll loop already joined".to_string()))?;
        join.await.map_err(|err| PipelineError::Join(err.to_string()))
    }
}

impl<S> Drop for PollHandle<S> {
    fn drop(&mut self) {
        let _ = self.cancel.send(true);
    }
}

pub fn spawn_poll_loop<Src, Sch, Snk>(
    mut poller: RunStatusPoller,
    source: Src,
    scheduler: Sch,
    mut sink: Snk,
) -> PollHandle<Snk>
where
    Src: RunStatusSource + 'static,
    Sch: PollScheduler + 'static,
    Snk: RunEventSink + Send + 'static,
{
    let (cancel, shutdown) = watch::channel(false);
    let join = tokio::spawn(async move {
        let exit = drive_poll_loop(&mut poller, &source, &scheduler, &mut sink, shutdown).await;
        (exit, sink)
    });
    PollHandle {
        cancel,
        join: Some(join),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::{PollConfig, DEFAULT_MAX_ATTEMPTS};
    use serde_json::Value;
    use srrm_core::run_contracts::OrchestratorRunState;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct InstantScheduler {
        delays: Mutex<Vec<Duration>>,
    }

    impl PollScheduler for InstantScheduler {
        async fn sleep(&self, delay: Duration) {
            self.delays.lock().expect("delays lock").push(delay);
        }
    }

    struct PendingScheduler;

    impl PollScheduler for PendingScheduler {
        async fn sleep(&self, _delay: Duration) {
            std::future::pending::<()>().await
        }
    }

    struct ScriptedSource {
        script: Mutex<VecDeque<Result<RunState, StatusFetchError>>>,
        repeat: Option<OrchestratorRunState>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn states(states: &[&str]) -> Self {
            Self {
                script: Mutex::new(states.iter().map(|state| Ok(run(state))).collect()),
                repeat: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn repeating(state: &str) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                repeat: Some(OrchestratorRunState::parse(state)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RunStatusSource for ScriptedSource {
        async fn fetch_status(&self, _run_id: &str) -> Result<RunState, StatusFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.script.lock().expect("script lock").pop_front();
            match (scripted, &self.repeat) {
                (Some(next), _) => next,
                (None, Some(state)) => Ok(run(state.as_str())),
                (None, None) => Err(StatusFetchError::Transport("script exhausted".to_string())),
            }
        }
    }

    fn run(state: &str) -> RunState {
        RunState {
            run_id: "run-1".to_string(),
            state: OrchestratorRunState::parse(state),
            started_at: None,
            ended_at: None,
            detail: Value::Null,
        }
    }

    #[derive(Debug, Default)]
    struct RecordingSink {
        successes: usize,
        failures: usize,
        timeouts: usize,
        poll_errors: usize,
    }

    impl RunEventSink for RecordingSink {
        fn on_success(&mut self, _run: &RunState) {
            self.successes += 1;
        }

        fn on_failure(&mut self, _run: &RunState) {
            self.failures += 1;
        }

        fn on_timeout(&mut self, _attempts: u32) {
            self.timeouts += 1;
        }

        fn on_poll_error(&mut self, _attempts: u32, _last_error: &str) {
            self.poll_errors += 1;
        }
    }

    #[tokio::test]
    async fn scripted_sequence_reaches_success_once() {
        let source = ScriptedSource::states(&["queued", "queued", "running", "success"]);
        let scheduler = InstantScheduler::default();
        let mut sink = RecordingSink::default();
        let mut poller = RunStatusPoller::new("run-1", PollConfig::default());
        let (_cancel, shutdown) = watch::channel(false);

        let exit = drive_poll_loop(&mut poller, &source, &scheduler, &mut sink, shutdown).await;

        assert!(matches!(exit, PollLoopExit::Finished(PollOutcome::Success(_))));
        assert_eq!(source.calls(), 4);
        assert_eq!(sink.successes, 1);
        assert_eq!(sink.failures + sink.timeouts + sink.poll_errors, 0);

        let delays = scheduler.delays.lock().expect("delays lock").clone();
        assert_eq!(delays.len(), 4);
        assert_eq!(delays[0], PollConfig::default().initial_delay);
        assert!(delays[1..]
            .iter()
            .all(|delay| *delay == PollConfig::default().interval));
    }

    #[tokio::test]
    async fn endless_running_times_out_without_callbacks() {
        let source = ScriptedSource::repeating("running");
        let scheduler = InstantScheduler::default();
        let mut sink = RecordingSink::default();
        let mut poller = RunStatusPoller::new("run-1", PollConfig::default());
        let (_cancel, shutdown) = watch::channel(false);

        let exit = drive_poll_loop(&mut poller, &source, &scheduler, &mut sink, shutdown).await;

        assert!(matches!(
            exit,
            PollLoopExit::Finished(PollOutcome::TimedOut { attempts: 60, .. })
        ));
        assert_eq!(source.calls(), DEFAULT_MAX_ATTEMPTS as usize);
        assert_eq!(sink.successes, 0);
        assert_eq!(sink.failures, 0);
        assert_eq!(sink.timeouts, 1);
    }

    #[tokio::test]
    async fn failed_run_calls_failure_handler() {
        let source = ScriptedSource::states(&["running", "failed"]);
        let mut sink = RecordingSink::default();
        let mut poller = RunStatusPoller::new("run-1", PollConfig::default());
        let (_cancel, shutdown) = watch::channel(false);

        let exit = drive_poll_loop(
            &mut poller,
            &source,
            &InstantScheduler::default(),
            &mut sink,
            shutdown,
        )
        .await;

        assert!(matches!(exit, PollLoopExit::Finished(PollOutcome::Failed(_))));
        assert_eq!(sink.failures, 1);
        assert_eq!(sink.successes, 0);
    }

    #[tokio::test]
    async fn dropped_sender_cancels_before_first_check() {
        let source = ScriptedSource::repeating("running");
        let mut sink = RecordingSink::default();
        let mut poller = RunStatusPoller::new("run-1", PollConfig::default());
        let (cancel, shutdown) = watch::channel(false);
        drop(cancel);

        let exit = drive_poll_loop(&mut poller, &source, &PendingScheduler, &mut sink, shutdown).await;

        assert_eq!(exit, PollLoopExit::Cancelled { attempts: 0 });
        assert_eq!(source.calls(), 0);
        assert_eq!(sink.timeouts + sink.successes, 0);
    }

    #[tokio::test]
    async fn raised_flag_cancels_pending_wait() {
        let source = ScriptedSource::repeating("running");
        let calls = Arc::clone(&source.calls);
        let handle = spawn_poll_loop(
            RunStatusPoller::new("run-1", PollConfig::default()),
            source,
            PendingScheduler,
            RecordingSink::default(),
        );

        tokio::task::yield_now().await;
        handle.cancel();
        let (exit, sink) = handle.join().await.expect("join poll loop");

        assert_eq!(exit, PollLoopExit::Cancelled { attempts: 0 });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.successes + sink.timeouts, 0);
    }
}
