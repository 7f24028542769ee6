pub mod explanation;
pub mod gateway;
pub mod run_contracts;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub use explanation::{
    ContributionPayload, DecodeStatus, DecodedContributions, ExplanationRecord, PayloadDecodeError,
};

/// Canonical risk classification. Free-form labels coming from the prediction
/// job or uploaded files are folded into one of these four values exactly once,
/// when the row enters the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskCategory {
    High,
    Medium,
    Low,
    Unknown,
}

impl RiskCategory {
    /// Fixed evaluation order used for majority tie-breaks.
    pub const PRIORITY: [RiskCategory; 4] = [
        RiskCategory::High,
        RiskCategory::Medium,
        RiskCategory::Low,
        RiskCategory::Unknown,
    ];

    /// Total normalization: case and separators are ignored, an optional
    /// `risk` suffix is accepted, anything unrecognized is `Unknown`.
    pub fn normalize(raw: &str) -> Self {
        let folded = raw
            .chars()
            .filter(|ch| !ch.is_whitespace() && *ch != '_' && *ch != '-')
            .flat_map(char::to_lowercase)
            .collect::<String>();
        match folded.as_str() {
            "high" | "highrisk" => RiskCategory::High,
            "medium" | "mediumrisk" => RiskCategory::Medium,
            "low" | "lowrisk" => RiskCategory::Low,
            _ => RiskCategory::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::High => "High",
            RiskCategory::Medium => "Medium",
            RiskCategory::Low => "Low",
            RiskCategory::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RiskCategory {
    fn from(raw: &str) -> Self {
        RiskCategory::normalize(raw)
    }
}

impl Serialize for RiskCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RiskCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .as_deref()
            .map(RiskCategory::normalize)
            .unwrap_or(RiskCategory::Unknown))
    }
}

/// Records keyed by `(entity, timestamp)`.
pub trait TimeKeyed {
    fn entity_id(&self) -> &str;
    fn observed_at(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PredictionRow")]
pub struct PredictionRecord {
    pub entity_id: String,
    pub observed_at: DateTime<Utc>,
    pub predicted_category: RiskCategory,
    pub raw_category: String,
    pub prob_high: Option<f64>,
    pub prob_medium: Option<f64>,
    pub prob_low: Option<f64>,
    pub model_version: Option<String>,
    pub snapshot_date: Option<NaiveDate>,
}

impl PredictionRecord {
    pub fn new(
        entity_id: impl Into<String>,
        observed_at: DateTime<Utc>,
        raw_category: impl Into<String>,
    ) -> Self {
        let raw_category = raw_category.into();
        Self {
            entity_id: entity_id.into(),
            observed_at,
            predicted_category: RiskCategory::normalize(&raw_category),
            raw_category,
            prob_high: None,
            prob_medium: None,
            prob_low: None,
            model_version: None,
            snapshot_date: None,
        }
    }

    pub fn with_probabilities(
        mut self,
        prob_high: Option<f64>,
        prob_medium: Option<f64>,
        prob_low: Option<f64>,
    ) -> Self {
        self.prob_high = prob_high;
        self.prob_medium = prob_medium;
        self.prob_low = prob_low;
        self
    }

    pub fn with_model_version(mut self, model_version: impl Into<String>) -> Self {
        self.model_version = Some(model_version.into());
        self
    }

    pub fn with_snapshot_date(mut self, snapshot_date: NaiveDate) -> Self {
        self.snapshot_date = Some(snapshot_date);
        self
    }

    /// `prob_high` with null coerced to zero, used for ranking and averages.
    pub fn prob_high_or_zero(&self) -> f64 {
        self.prob_high.unwrap_or(0.0)
    }
}

impl TimeKeyed for PredictionRecord {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

/// Wire shape of a prediction row as written by the prediction job.
#[derive(Debug, Clone, Deserialize)]
struct PredictionRow {
    #[serde(alias = "supplier_id")]
    entity_id: String,
    #[serde(alias = "prediction_date", deserialize_with = "deserialize_timestamp")]
    observed_at: DateTime<Utc>,
    #[serde(default, alias = "predicted_risk")]
    raw_category: Option<String>,
    #[serde(default)]
    prob_high: Option<f64>,
    #[serde(default)]
    prob_medium: Option<f64>,
    #[serde(default)]
    prob_low: Option<f64>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default, alias = "date")]
    snapshot_date: Option<NaiveDate>,
}

impl From<PredictionRow> for PredictionRecord {
    fn from(row: PredictionRow) -> Self {
        let mut record = PredictionRecord::new(
            row.entity_id,
            row.observed_at,
            row.raw_category.unwrap_or_default(),
        )
        .with_probabilities(row.prob_high, row.prob_medium, row.prob_low);
        record.model_version = row.model_version;
        record.snapshot_date = row.snapshot_date;
        record
    }
}

/// One row of the "risk master" metric table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshotRecord {
    #[serde(alias = "supplier_id")]
    pub entity_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub on_time_delivery_rate: Option<f64>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub geopolitical_risk_score: Option<f64>,
    #[serde(default)]
    pub communication_score: Option<f64>,
    #[serde(default)]
    pub annual_spending_rupees: Option<f64>,
    #[serde(default)]
    pub total_risk_score: Option<f64>,
    #[serde(default)]
    pub risk_category: Option<String>,
    #[serde(default)]
    pub industry_segment: Option<String>,
    #[serde(default)]
    pub supplier_size: Option<String>,
    #[serde(default, alias = "is_predicted")]
    pub scored: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProfile {
    #[serde(alias = "supplier_id")]
    pub entity_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub industry_segment: Option<String>,
    #[serde(default)]
    pub supplier_size: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// Output of downstream business-process workers; read only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    #[serde(alias = "supplier_id")]
    pub entity_id: String,
    pub event_type: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Error taxonomy shared by every crate; user-facing messages switch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Upstream,
    Transport,
    Timeout,
    Data,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Upstream => "upstream",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Data => "data",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts RFC 3339, naive ISO datetimes (assumed UTC) and bare dates
/// (midnight UTC). The prediction job writes all three shapes.
pub fn parse_timestamp_lenient(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub(crate) fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp_lenient(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalize_folds_case_and_separators() {
        assert_eq!(RiskCategory::normalize("High"), RiskCategory::High);
        assert_eq!(RiskCategory::normalize("HIGH_RISK"), RiskCategory::High);
        assert_eq!(RiskCategory::normalize("high risk"), RiskCategory::High);
        assert_eq!(RiskCategory::normalize(" Medium-Risk "), RiskCategory::Medium);
        assert_eq!(RiskCategory::normalize("low"), RiskCategory::Low);
        assert_eq!(RiskCategory::normalize("critical"), RiskCategory::Unknown);
        assert_eq!(RiskCategory::normalize(""), RiskCategory::Unknown);
    }

    #[test]
    fn prediction_row_normalizes_category_once() {
        let record: PredictionRecord = serde_json::from_value(serde_json::json!({
            "supplier_id": "S-1",
            "prediction_date": "2024-02-01T10:30:00.123456",
            "predicted_risk": "High Risk",
            "prob_high": 0.81,
            "prob_medium": null,
            "date": "2024-01-31"
        }))
        .expect("row parses");

        assert_eq!(record.entity_id, "S-1");
        assert_eq!(record.predicted_category, RiskCategory::High);
        assert_eq!(record.raw_category, "High Risk");
        assert_eq!(record.prob_high, Some(0.81));
        assert_eq!(record.prob_medium, None);
        assert_eq!(
            record.snapshot_date,
            NaiveDate::from_ymd_opt(2024, 1, 31)
        );
        assert_eq!(
            record.observed_at.date_naive(),
            NaiveDate::from_ymd_opt(2024, 2, 1).expect("date")
        );
    }

    #[test]
    fn lenient_timestamp_accepts_dates_and_naive_datetimes() {
        let midnight = Utc
            .with_ymd_and_hms(2024, 1, 15, 0, 0, 0)
            .single()
            .expect("valid timestamp");
        assert_eq!(parse_timestamp_lenient("2024-01-15"), Some(midnight));
        assert_eq!(
            parse_timestamp_lenient("2024-01-15T00:00:00+00:00"),
            Some(midnight)
        );
        assert_eq!(parse_timestamp_lenient("2024-01-15 00:00:00"), Some(midnight));
        assert_eq!(parse_timestamp_lenient("yesterday"), None);
    }
}
