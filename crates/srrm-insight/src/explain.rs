use crate::resolver::resolve_latest;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use srrm_core::{DecodeStatus, ExplanationRecord};
use tracing::warn;

pub const DETAIL_TOP_PER_DIRECTION: usize = 5;
pub const SUMMARY_TOP: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionDirection {
    Increases,
    Reduces,
}

impl ContributionDirection {
    pub fn of(value: f64) -> Self {
        if value >= 0.0 {
            Self::Increases
        } else {
            Self::Reduces
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increases => "increases risk",
            Self::Reduces => "reduces risk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedContribution {
    pub feature: String,
    pub value: f64,
    pub direction: ContributionDirection,
}

/// Finite numeric entries ordered by magnitude, largest first. Equal
/// magnitudes keep mapping order.
pub fn rank_contributions(contributions: &Map<String, Value>) -> Vec<RankedContribution> {
    let mut ranked = contributions
        .iter()
        .filter_map(|(feature, value)| {
            let value = value.as_f64().filter(|v| v.is_finite())?;
            Some(RankedContribution {
                feature: feature.clone(),
                value,
                direction: ContributionDirection::of(value),
            })
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.value.abs().total_cmp(&a.value.abs()));
    ranked
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetailView {
    pub increases: Vec<RankedContribution>,
    pub reduces: Vec<RankedContribution>,
}

impl DetailView {
    /// Splits an already ranked list by sign, keeping `limit` per side.
    pub fn from_ranked(ranked: &[RankedContribution], limit: usize) -> Self {
        let pick = |direction: ContributionDirection| {
            ranked
                .iter()
                .filter(|entry| entry.direction == direction)
                .take(limit)
                .cloned()
                .collect::<Vec<_>>()
        };
        Self {
            increases: pick(ContributionDirection::Increases),
            reduces: pick(ContributionDirection::Reduces),
        }
    }
}

pub fn summary_top(ranked: &[RankedContribution], limit: usize) -> Vec<RankedContribution> {
    ranked.iter().take(limit).cloned().collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityExplanationSummary {
    pub entity_id: String,
    pub observed_at: DateTime<Utc>,
    pub top: Vec<RankedContribution>,
    pub degraded: Option<String>,
}

/// Latest explanation per entity, each decoded on its own. A payload that
/// fails to decode contributes an empty list and is reported as degraded.
pub fn summarize_latest_explanations(
    explanations: &[ExplanationRecord],
    limit: usize,
) -> Vec<EntityExplanationSummary> {
    resolve_latest(explanations)
        .into_values()
        .map(|record| {
            let decoded = record.contributions.decode();
            let degraded = match decoded.status {
                DecodeStatus::Degraded { reason } => {
                    warn!(
                        event = "explanation_decode_degraded",
                        entity_id = %record.entity_id,
                        reason = %reason
                    );
                    Some(reason)
                }
                DecodeStatus::Decoded | DecodeStatus::Missing => None,
            };
            let ranked = rank_contributions(&decoded.contributions);
            EntityExplanationSummary {
                entity_id: record.entity_id,
                observed_at: record.observed_at,
                top: summary_top(&ranked, limit),
                degraded,
            }
        })
        .collect()
}
