//! Query contract of the record store. Analytics and the run pipeline only
//! talk to this trait; `srrm-storage` provides the SQLite implementation.

use crate::{
    EntityProfile, ExplanationRecord, MetricSnapshotRecord, PredictionRecord, RiskCategory,
    WorkflowEvent,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSortKey {
    #[default]
    ObservedAt,
    ProbHigh,
    ProbMedium,
    ProbLow,
}

impl PredictionSortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionSortKey::ObservedAt => "observed_at",
            PredictionSortKey::ProbHigh => "prob_high",
            PredictionSortKey::ProbMedium => "prob_medium",
            PredictionSortKey::ProbLow => "prob_low",
        }
    }
}

impl std::str::FromStr for PredictionSortKey {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "observed_at" | "prediction_date" | "date" => Ok(PredictionSortKey::ObservedAt),
            "prob_high" => Ok(PredictionSortKey::ProbHigh),
            "prob_medium" => Ok(PredictionSortKey::ProbMedium),
            "prob_low" => Ok(PredictionSortKey::ProbLow),
            other => Err(format!("Unknown sort key: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionQuery {
    pub entity_id: Option<String>,
    pub observed_since: Option<DateTime<Utc>>,
    pub category: Option<RiskCategory>,
    pub sort: PredictionSortKey,
    pub order: SortOrder,
    pub page: Option<Page>,
}

impl PredictionQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(observed_since: DateTime<Utc>) -> Self {
        Self {
            observed_since: Some(observed_since),
            ..Self::default()
        }
    }

    pub fn for_entity(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotQuery {
    pub entity_id: Option<String>,
    pub risk_category: Option<String>,
    pub industry_segment: Option<String>,
    pub scored: Option<bool>,
    pub page: Option<Page>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplanationQuery {
    pub entity_id: Option<String>,
    pub observed_since: Option<DateTime<Utc>>,
}

/// Reachability of an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub reachable: bool,
    pub status_code: Option<u16>,
}

impl HealthReport {
    pub fn reachable(status_code: Option<u16>) -> Self {
        Self {
            reachable: true,
            status_code,
        }
    }

    pub fn unreachable(status_code: Option<u16>) -> Self {
        Self {
            reachable: false,
            status_code,
        }
    }
}

/// Every input of the dashboard overview, read as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverviewSnapshot {
    pub predictions: Vec<PredictionRecord>,
    pub snapshot_entities: usize,
    pub unscored_snapshots: usize,
    pub profiles: usize,
}

pub trait RecordGateway {
    type Error: std::error::Error + Send + Sync + 'static;

    fn upsert_profiles(&self, profiles: &[EntityProfile]) -> Result<usize, Self::Error>;
    fn profiles(&self) -> Result<Vec<EntityProfile>, Self::Error>;

    fn insert_snapshots(&self, snapshots: &[MetricSnapshotRecord]) -> Result<usize, Self::Error>;
    fn snapshots(&self, query: &SnapshotQuery) -> Result<Vec<MetricSnapshotRecord>, Self::Error>;
    fn count_snapshots(&self, query: &SnapshotQuery) -> Result<usize, Self::Error>;
    fn mark_scored(
        &self,
        entity_id: &str,
        date: chrono::NaiveDate,
    ) -> Result<usize, Self::Error>;

    fn insert_predictions(&self, predictions: &[PredictionRecord]) -> Result<usize, Self::Error>;
    fn predictions(&self, query: &PredictionQuery) -> Result<Vec<PredictionRecord>, Self::Error>;
    fn count_predictions(&self, query: &PredictionQuery) -> Result<usize, Self::Error>;

    fn insert_explanations(
        &self,
        explanations: &[ExplanationRecord],
    ) -> Result<usize, Self::Error>;
    fn explanations(
        &self,
        query: &ExplanationQuery,
    ) -> Result<Vec<ExplanationRecord>, Self::Error>;

    fn insert_workflow_events(&self, events: &[WorkflowEvent]) -> Result<usize, Self::Error>;
    fn workflow_events(&self) -> Result<Vec<WorkflowEvent>, Self::Error>;

    fn overview_snapshot(&self) -> Result<OverviewSnapshot, Self::Error>;
    fn health(&self) -> HealthReport;
}
