use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const NO_NEW_ROWS_MARKER: &str = "no new rows";

/// Run state as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorRunState {
    Queued,
    Running,
    Success,
    Failed,
    Other(String),
}

impl OrchestratorRunState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "running" => Self::Running,
            "success" => Self::Success,
            "failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for OrchestratorRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient view of one triggered run; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub run_id: String,
    pub state: OrchestratorRunState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub detail: Value,
}

/// `conf` object attached to a trigger request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConf {
    pub source: String,
    pub triggered_at: String,
}

impl TriggerConf {
    pub fn new(source: impl Into<String>, triggered_at: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            triggered_at: triggered_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Accepted {
        run_id: String,
        triggered_at: DateTime<Utc>,
        response: Value,
    },
    /// The orchestrator refused because there was nothing to score.
    BenignNoOp { message: String },
    Failed { status: u16, message: String },
    TransportError { message: String },
}

impl TriggerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::BenignNoOp { .. })
    }

    pub fn run_id(&self) -> Option<&str> {
        match self {
            Self::Accepted { run_id, .. } => Some(run_id.as_str()),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::BenignNoOp { .. } => "no_op",
            Self::Failed { .. } => "failed",
            Self::TransportError { .. } => "transport_error",
        }
    }
}

/// Case-insensitive check for the orchestrator's "nothing to do" reply.
pub fn is_no_new_rows_message(text: &str) -> bool {
    text.to_lowercase().contains(NO_NEW_ROWS_MARKER)
}
