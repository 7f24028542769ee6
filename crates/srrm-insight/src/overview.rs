use crate::aggregate::{aggregate_predictions, AggregateResult};
use serde::Serialize;
use srrm_core::gateway::OverviewSnapshot;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardOverview {
    pub total_suppliers: usize,
    pub total_profiles: usize,
    pub total_predictions: usize,
    pub unscored_snapshots: usize,
    pub aggregate: AggregateResult,
}

pub fn build_overview(snapshot: &OverviewSnapshot) -> DashboardOverview {
    let aggregate = aggregate_predictions(&snapshot.predictions);
    DashboardOverview {
        total_suppliers: snapshot.snapshot_entities,
        total_profiles: snapshot.profiles,
        total_predictions: aggregate.total_predictions,
        unscored_snapshots: snapshot.unscored_snapshots,
        aggregate,
    }
}
