//! Orchestrator client. One trigger attempt per call; the HTTP layer sits
//! behind [`OrchestratorTransport`] so the classification logic can be driven
//! by scripted replies.

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use srrm_core::gateway::HealthReport;
use srrm_core::run_contracts::{
    is_no_new_rows_message, OrchestratorRunState, RunState, TriggerConf, TriggerOutcome,
};
use srrm_core::{parse_timestamp_lenient, FailureKind};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_API_BASE: &str = "http://localhost:8080/api/v1";
pub const DEFAULT_PIPELINE_ID: &str = "srrm_prediction_dag";
pub const DEFAULT_CREDENTIAL: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub api_base: String,
    pub username: String,
    pub password: String,
    pub pipeline_id: String,
    /// `None` leaves the transport default in place.
    pub request_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            username: DEFAULT_CREDENTIAL.to_string(),
            password: DEFAULT_CREDENTIAL.to_string(),
            pipeline_id: DEFAULT_PIPELINE_ID.to_string(),
            request_timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportFault {
    pub message: String,
}

impl TransportFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait OrchestratorTransport: Send + Sync {
    fn post_json(
        &self,
        url: &Url,
        body: &Value,
    ) -> impl Future<Output = Result<HttpReply, TransportFault>> + Send;

    fn get(&self, url: &Url) -> impl Future<Output = Result<HttpReply, TransportFault>> + Send;
}

/// Basic-auth JSON transport over reqwest.
pub struct HttpTransport {
    client: Client,
    username: String,
    password: String,
}

impl HttpTransport {
    pub fn new(config: &OrchestratorConfig) -> Result<Self, PipelineError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| PipelineError::ClientSetup(err.to_string()))?;
        Ok(Self {
            client,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<HttpReply, TransportFault> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|err| TransportFault::new(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| TransportFault::new(format!("failed reading response body: {err}")))?;
        Ok(HttpReply { status, body })
    }
}

impl OrchestratorTransport for HttpTransport {
    async fn post_json(&self, url: &Url, body: &Value) -> Result<HttpReply, TransportFault> {
        self.send(self.client.post(url.clone()).json(body)).await
    }

    async fn get(&self, url: &Url) -> Result<HttpReply, TransportFault> {
        self.send(self.client.get(url.clone())).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusFetchError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("orchestrator returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unreadable run status: {0}")]
    Decode(String),
}

impl StatusFetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StatusFetchError::Transport(_) => FailureKind::Transport,
            StatusFetchError::Http { .. } => FailureKind::Upstream,
            StatusFetchError::Decode(_) => FailureKind::Data,
        }
    }
}

pub struct PipelineRunClient<T> {
    transport: T,
    config: OrchestratorConfig,
    api_base: Url,
}

impl PipelineRunClient<HttpTransport> {
    pub fn over_http(config: OrchestratorConfig) -> Result<Self, PipelineError> {
        let transport = HttpTransport::new(&config)?;
        Self::new(transport, config)
    }
}

impl<T: OrchestratorTransport> PipelineRunClient<T> {
    /// Fails when `api_base` is not an absolute URL that can carry a path.
    pub fn new(transport: T, config: OrchestratorConfig) -> Result<Self, PipelineError> {
        let api_base = Url::parse(config.api_base.trim()).map_err(|err| {
            PipelineError::InvalidApiBase {
                api_base: config.api_base.clone(),
                reason: err.to_string(),
            }
        })?;
        if api_base.cannot_be_a_base() {
            return Err(PipelineError::InvalidApiBase {
                api_base: config.api_base.clone(),
                reason: "url cannot carry a path".to_string(),
            });
        }
        Ok(Self {
            transport,
            config,
            api_base,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Appends percent-encoded segments to the API base.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        // `new` rejects bases that cannot carry a path.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn trigger_url(&self) -> Url {
        self.endpoint(&["dags", &self.config.pipeline_id, "dagRuns"])
    }

    pub fn run_url(&self, run_id: &str) -> Url {
        self.endpoint(&["dags", &self.config.pipeline_id, "dagRuns", run_id])
    }

    pub fn health_url(&self) -> Url {
        self.endpoint(&["health"])
    }

    /// Exactly one request; failures are reported in the outcome, never retried.
    pub async fn trigger(&self, source: &str, triggered_at: DateTime<Utc>) -> TriggerOutcome {
        let body = json!({ "conf": TriggerConf::new(source, triggered_at) });
        let url = self.trigger_url();
        debug!(event = "pipeline_trigger_request", url = %url, source);

        let outcome = match self.transport.post_json(&url, &body).await {
            Ok(reply) => classify_trigger_response(&reply, triggered_at),
            Err(fault) => TriggerOutcome::TransportError {
                message: fault.message,
            },
        };

        match &outcome {
            TriggerOutcome::Accepted { run_id, .. } => {
                info!(event = "pipeline_trigger_accepted", run_id = %run_id);
            }
            TriggerOutcome::BenignNoOp { message } => {
                info!(event = "pipeline_trigger_noop", message = %message);
            }
            TriggerOutcome::Failed { status, message } => {
                warn!(event = "pipeline_trigger_failed", status, message = %message);
            }
            TriggerOutcome::TransportError { message } => {
                warn!(event = "pipeline_trigger_transport_error", error = %message);
            }
        }
        outcome
    }

    pub async fn run_status(&self, run_id: &str) -> Result<RunState, StatusFetchError> {
        let reply = self
            .transport
            .get(&self.run_url(run_id))
            .await
            .map_err(|fault| StatusFetchError::Transport(fault.message))?;
        parse_run_state(run_id, &reply)
    }

    pub async fn health(&self) -> HealthReport {
        match self.transport.get(&self.health_url()).await {
            Ok(reply) if reply.is_success() => HealthReport::reachable(Some(reply.status)),
            Ok(reply) => HealthReport::unreachable(Some(reply.status)),
            Err(fault) => {
                debug!(event = "orchestrator_health_failed", error = %fault);
                HealthReport::unreachable(None)
            }
        }
    }
}

pub fn classify_trigger_response(reply: &HttpReply, triggered_at: DateTime<Utc>) -> TriggerOutcome {
    if !reply.is_success() {
        let message = error_text(reply);
        if is_no_new_rows_message(&message) || is_no_new_rows_message(&reply.body) {
            return TriggerOutcome::BenignNoOp { message };
        }
        return TriggerOutcome::Failed {
            status: reply.status,
            message,
        };
    }

    let response = match serde_json::from_str::<Value>(&reply.body) {
        Ok(value) => value,
        Err(err) => {
            return TriggerOutcome::TransportError {
                message: format!("unreadable trigger response: {err}"),
            }
        }
    };
    let run_id = ["dag_run_id", "run_id"]
        .iter()
        .find_map(|key| response.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    match run_id {
        Some(run_id) => TriggerOutcome::Accepted {
            run_id,
            triggered_at,
            response,
        },
        None => TriggerOutcome::TransportError {
            message: "trigger response carries no run id".to_string(),
        },
    }
}

/// Error text from a JSON problem body, else the raw body, else the status.
fn error_text(reply: &HttpReply) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&reply.body) {
        let field = ["detail", "title", "error", "message"].iter().find_map(|key| {
            map.get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|text| !text.is_empty())
        });
        if let Some(text) = field {
            return text.to_string();
        }
    }
    let raw = reply.body.trim();
    if raw.is_empty() {
        format!("orchestrator returned HTTP {}", reply.status)
    } else {
        raw.to_string()
    }
}

fn parse_run_state(run_id: &str, reply: &HttpReply) -> Result<RunState, StatusFetchError> {
    if !reply.is_success() {
        return Err(StatusFetchError::Http {
            status: reply.status,
            message: error_text(reply),
        });
    }
    let detail = serde_json::from_str::<Value>(&reply.body)
        .map_err(|err| StatusFetchError::Decode(err.to_string()))?;
    let state = detail
        .get("state")
        .and_then(Value::as_str)
        .map(OrchestratorRunState::parse)
        .ok_or_else(|| StatusFetchError::Decode("missing `state` field".to_string()))?;
    let timestamp = |key: &str| {
        detail
            .get(key)
            .and_then(Value::as_str)
            .and_then(parse_timestamp_lenient)
    };
    let started_at = timestamp("start_date");
    let ended_at = timestamp("end_date");
    let reported_id = detail
        .get("dag_run_id")
        .and_then(Value::as_str)
        .unwrap_or(run_id)
        .to_string();

    Ok(RunState {
        run_id: reported_id,
        state,
        started_at,
        ended_at,
        detail,
    })
}
