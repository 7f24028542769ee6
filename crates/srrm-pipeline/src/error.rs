use crate::dashboard_state::RunGuardError;
use srrm_core::FailureKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("http client setup failed: {0}")]
    ClientSetup(String),
    #[error("invalid orchestrator api base `{api_base}`: {reason}")]
    InvalidApiBase { api_base: String, reason: String },
    #[error(transparent)]
    RunGuard(#[from] RunGuardError),
    #[error("poll task ended abnormally: {0}")]
    Join(String),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::ClientSetup(_) => FailureKind::Transport,
            PipelineError::InvalidApiBase { .. } => FailureKind::Validation,
            PipelineError::RunGuard(err) => err.kind(),
            PipelineError::Join(_) => FailureKind::Upstream,
        }
    }
}
