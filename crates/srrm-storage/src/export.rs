use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use srrm_core::gateway::{ExplanationQuery, PredictionQuery, RecordGateway, SnapshotQuery};
use srrm_core::FailureKind;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("row {row} does not serialize to a flat record")]
    NotARecord { row: usize },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store read failed: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ExportError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExportError::Store(_) => FailureKind::Upstream,
            ExportError::NotARecord { .. } | ExportError::Serialization(_) => FailureKind::Data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportTable {
    Profiles,
    Snapshots,
    Predictions,
    Explanations,
    WorkflowEvents,
}

impl ExportTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            ExportTable::Profiles => crate::PROFILE_TABLE,
            ExportTable::Snapshots => crate::SNAPSHOT_TABLE,
            ExportTable::Predictions => crate::PREDICTION_TABLE,
            ExportTable::Explanations => crate::EXPLANATION_TABLE,
            ExportTable::WorkflowEvents => crate::WORKFLOW_EVENT_TABLE,
        }
    }
}

impl fmt::Display for ExportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for ExportTable {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "profiles" | "supplier_profile" => Ok(ExportTable::Profiles),
            "snapshots" | "supplier_risk_master" => Ok(ExportTable::Snapshots),
            "predictions" | "risk_prediction_history" => Ok(ExportTable::Predictions),
            "explanations" | "shap_explanations" => Ok(ExportTable::Explanations),
            "events" | "workflow_events" => Ok(ExportTable::WorkflowEvents),
            other => Err(format!("Unknown table: {other}")),
        }
    }
}

/// Quotes a field when it contains a separator, quote or line break.
pub fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => csv_escape(text),
        Some(other) => csv_escape(&other.to_string()),
    }
}

/// Header comes from the first row's field names in serialization order.
/// An empty slice produces an empty document.
pub fn export_csv<T: Serialize>(rows: &[T]) -> Result<String, ExportError> {
    let mut records = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        match serde_json::to_value(row)? {
            Value::Object(map) => records.push(map),
            _ => return Err(ExportError::NotARecord { row: idx }),
        }
    }
    let Some(first) = records.first() else {
        return Ok(String::new());
    };

    let header = first.keys().cloned().collect::<Vec<_>>();
    let mut out = header
        .iter()
        .map(|name| csv_escape(name))
        .collect::<Vec<_>>()
        .join(",");
    out.push('\n');
    for record in &records {
        let line = header
            .iter()
            .map(|name| cell(record.get(name)))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

pub fn export_file_name(table: &str, now: DateTime<Utc>) -> String {
    format!(
        "{table}_{}.csv",
        now.to_rfc3339_opts(SecondsFormat::Secs, true).replace(':', "-")
    )
}

/// Full contents of one table as CSV.
pub fn export_table<G>(gateway: &G, table: ExportTable) -> Result<String, ExportError>
where
    G: RecordGateway,
{
    let store = |err: G::Error| ExportError::Store(Box::new(err));
    match table {
        ExportTable::Profiles => export_csv(&gateway.profiles().map_err(store)?),
        ExportTable::Snapshots => {
            export_csv(&gateway.snapshots(&SnapshotQuery::default()).map_err(store)?)
        }
        ExportTable::Predictions => {
            export_csv(&gateway.predictions(&PredictionQuery::all()).map_err(store)?)
        }
        ExportTable::Explanations => export_csv(
            &gateway
                .explanations(&ExplanationQuery::default())
                .map_err(store)?,
        ),
        ExportTable::WorkflowEvents => export_csv(&gateway.workflow_events().map_err(store)?),
    }
}
