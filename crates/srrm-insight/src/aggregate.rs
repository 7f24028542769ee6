use crate::resolver::resolve_latest;
use serde::Serialize;
use srrm_core::{PredictionRecord, RiskCategory};
use std::collections::BTreeMap;

pub const TOP_HIGH_RISK_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unknown: usize,
}

/// Per-entity occurrence counts over the full prediction history.
pub type CategoryTally = CategoryCounts;

impl CategoryCounts {
    pub fn get(&self, category: RiskCategory) -> usize {
        match category {
            RiskCategory::High => self.high,
            RiskCategory::Medium => self.medium,
            RiskCategory::Low => self.low,
            RiskCategory::Unknown => self.unknown,
        }
    }

    pub fn increment(&mut self, category: RiskCategory) {
        match category {
            RiskCategory::High => self.high += 1,
            RiskCategory::Medium => self.medium += 1,
            RiskCategory::Low => self.low += 1,
            RiskCategory::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.high + self.medium + self.low + self.unknown
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateResult {
    /// Entities per majority classification.
    pub category_counts: CategoryCounts,
    /// Raw prediction records per category.
    pub record_category_counts: CategoryCounts,
    pub average_prob_high: Option<f64>,
    pub top_high_risk: Vec<PredictionRecord>,
    pub latest: BTreeMap<String, PredictionRecord>,
    pub majority_by_entity: BTreeMap<String, RiskCategory>,
    pub total_predictions: usize,
    pub distinct_entities: usize,
}

/// Majority vote with a fixed priority order: the first of High, Medium, Low,
/// Unknown whose count equals the maximum wins.
pub fn majority_category(tally: &CategoryTally) -> RiskCategory {
    let max = RiskCategory::PRIORITY
        .iter()
        .map(|category| tally.get(*category))
        .max()
        .unwrap_or(0);
    RiskCategory::PRIORITY
        .iter()
        .copied()
        .find(|category| tally.get(*category) == max)
        .unwrap_or(RiskCategory::Unknown)
}

pub fn tally_by_entity(records: &[PredictionRecord]) -> BTreeMap<String, CategoryTally> {
    let mut tallies = BTreeMap::<String, CategoryTally>::new();
    for record in records {
        tallies
            .entry(record.entity_id.clone())
            .or_default()
            .increment(record.predicted_category);
    }
    tallies
}

/// Mean of `prob_high` across every record (nulls count as zero).
pub fn average_prob_high(records: &[PredictionRecord]) -> Option<f64> {
    if records.is_empty() {
        return None;
    }
    let sum = records
        .iter()
        .map(PredictionRecord::prob_high_or_zero)
        .sum::<f64>();
    Some(sum / records.len() as f64)
}

pub fn top_high_risk(records: &[PredictionRecord], limit: usize) -> Vec<PredictionRecord> {
    let mut ranked = records.iter().collect::<Vec<_>>();
    // sort_by is stable; equal scores keep input order.
    ranked.sort_by(|a, b| b.prob_high_or_zero().total_cmp(&a.prob_high_or_zero()));
    ranked.into_iter().take(limit).cloned().collect()
}

pub fn aggregate_predictions(records: &[PredictionRecord]) -> AggregateResult {
    let tallies = tally_by_entity(records);

    let mut category_counts = CategoryCounts::default();
    let mut majority_by_entity = BTreeMap::new();
    for (entity_id, tally) in &tallies {
        let majority = majority_category(tally);
        category_counts.increment(majority);
        majority_by_entity.insert(entity_id.clone(), majority);
    }

    let mut record_category_counts = CategoryCounts::default();
    for record in records {
        record_category_counts.increment(record.predicted_category);
    }

    AggregateResult {
        category_counts,
        record_category_counts,
        average_prob_high: average_prob_high(records),
        top_high_risk: top_high_risk(records, TOP_HIGH_RISK_LIMIT),
        latest: resolve_latest(records),
        majority_by_entity,
        total_predictions: records.len(),
        distinct_entities: tallies.len(),
    }
}
