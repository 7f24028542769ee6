use crate::TimeKeyed;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadDecodeError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("encoded payload is not an object: {0}")]
    NotAnObject(&'static str),
    #[error("unexpected payload type: {0}")]
    UnexpectedType(&'static str),
}

/// Feature contribution payload as stored: either an already-decoded object or
/// an encoded JSON string. Decoding happens per record on read so that one bad
/// payload never poisons a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContributionPayload(pub Value);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    Decoded,
    Missing,
    Degraded { reason: String },
}

impl DecodeStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, DecodeStatus::Degraded { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedContributions {
    pub contributions: Map<String, Value>,
    pub status: DecodeStatus,
}

impl DecodedContributions {
    fn degraded(reason: impl Into<String>) -> Self {
        Self {
            contributions: Map::new(),
            status: DecodeStatus::Degraded {
                reason: reason.into(),
            },
        }
    }
}

impl ContributionPayload {
    pub fn decoded(contributions: Map<String, Value>) -> Self {
        Self(Value::Object(contributions))
    }

    pub fn encoded(text: impl Into<String>) -> Self {
        Self(Value::String(text.into()))
    }

    /// Strict decode. `Ok(None)` means no payload was recorded.
    pub fn try_decode(&self) -> Result<Option<Map<String, Value>>, PayloadDecodeError> {
        match &self.0 {
            Value::Object(map) => Ok(Some(map.clone())),
            Value::Null => Ok(None),
            Value::String(text) if text.trim().is_empty() => Ok(None),
            Value::String(text) => match serde_json::from_str::<Value>(text)? {
                Value::Object(map) => Ok(Some(map)),
                other => Err(PayloadDecodeError::NotAnObject(json_kind(&other))),
            },
            other => Err(PayloadDecodeError::UnexpectedType(json_kind(other))),
        }
    }

    /// Never fails: malformed payloads come back empty and flagged `Degraded`.
    pub fn decode(&self) -> DecodedContributions {
        match self.try_decode() {
            Ok(Some(contributions)) => DecodedContributions {
                contributions,
                status: DecodeStatus::Decoded,
            },
            Ok(None) => DecodedContributions {
                contributions: Map::new(),
                status: DecodeStatus::Missing,
            },
            Err(err) => DecodedContributions::degraded(err.to_string()),
        }
    }

    /// Text form used for storage columns.
    pub fn to_storage_text(&self) -> Option<String> {
        match &self.0 {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationRecord {
    #[serde(alias = "supplier_id")]
    pub entity_id: String,
    #[serde(alias = "prediction_date", deserialize_with = "crate::deserialize_timestamp")]
    pub observed_at: DateTime<Utc>,
    #[serde(default, alias = "shap_values")]
    pub contributions: ContributionPayload,
}

impl ExplanationRecord {
    /// Explanations pair with predictions by equality on both key fields.
    pub fn matches(&self, entity_id: &str, observed_at: DateTime<Utc>) -> bool {
        self.entity_id == entity_id && self.observed_at == observed_at
    }
}

impl TimeKeyed for ExplanationRecord {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
