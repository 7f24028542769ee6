//! Run bookkeeping shared by the commands that start and display pipeline
//! runs. One run may be in flight at a time. Within a process the guard is
//! the `active` slot; across processes it is an optional [`RunLock`] file.

use crate::lifecycle::RunReport;
use crate::run_lock::{read_holder, RunLock};
use chrono::{DateTime, Utc};
use srrm_core::FailureKind;
use srrm_insight::AggregateResult;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunGuardError {
    #[error("a pipeline run is already in progress (triggered at {triggered_at}{})", .run_id.as_deref().map(|id| format!(", run {id}")).unwrap_or_default())]
    RunInProgress {
        run_id: Option<String>,
        triggered_at: DateTime<Utc>,
    },
    #[error("another process holds the run lock {}", .path.display())]
    LockHeld { path: PathBuf },
    #[error("run lock {} is unusable: {message}", .path.display())]
    LockUnavailable { path: PathBuf, message: String },
}

impl RunGuardError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RunGuardError::RunInProgress { .. } | RunGuardError::LockHeld { .. } => {
                FailureKind::Validation
            }
            RunGuardError::LockUnavailable { .. } => FailureKind::Data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRun {
    pub triggered_at: DateTime<Utc>,
    /// Set once the orchestrator has accepted the trigger.
    pub run_id: Option<String>,
}

#[derive(Default)]
pub struct DashboardState {
    active: Option<ActiveRun>,
    lock_path: Option<PathBuf>,
    lock: Option<RunLock>,
    last_report: Option<RunReport>,
    latest_aggregate: Option<AggregateResult>,
}

impl DashboardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also guards against runs started by other processes sharing `path`.
    pub fn with_run_lock(path: impl AsRef<Path>) -> Self {
        Self {
            lock_path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    pub fn begin_run(&mut self, triggered_at: DateTime<Utc>) -> Result<(), RunGuardError> {
        if let Some(active) = &self.active {
            return Err(RunGuardError::RunInProgress {
                run_id: active.run_id.clone(),
                triggered_at: active.triggered_at,
            });
        }
        let active = ActiveRun {
            triggered_at,
            run_id: None,
        };
        if let Some(path) = &self.lock_path {
            match RunLock::try_acquire(path, &active) {
                Ok(Some(lock)) => self.lock = Some(lock),
                Ok(None) => {
                    return Err(match read_holder(path) {
                        Some(holder) => RunGuardError::RunInProgress {
                            run_id: holder.run_id,
                            triggered_at: holder.triggered_at,
                        },
                        None => RunGuardError::LockHeld { path: path.clone() },
                    })
                }
                Err(err) => {
                    return Err(RunGuardError::LockUnavailable {
                        path: path.clone(),
                        message: err.to_string(),
                    })
                }
            }
        }
        self.active = Some(active);
        Ok(())
    }

    pub fn attach_run_id(&mut self, run_id: impl Into<String>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.run_id = Some(run_id.into());
        if let Some(lock) = self.lock.as_mut() {
            if let Err(err) = lock.record(active) {
                warn!(event = "run_lock_record_failed", path = %lock.path().display(), error = %err);
            }
        }
    }

    /// Clears the active run and releases the lock file.
    pub fn complete_run(&mut self, report: RunReport) {
        self.active = None;
        self.lock = None;
        self.last_report = Some(report);
    }

    pub fn is_run_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    pub fn record_aggregate(&mut self, aggregate: AggregateResult) {
        self.latest_aggregate = Some(aggregate);
    }

    pub fn latest_aggregate(&self) -> Option<&AggregateResult> {
        self.latest_aggregate.as_ref()
    }
}
