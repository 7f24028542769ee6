use crate::poll_loop::RunEventSink;
use chrono::{DateTime, Utc};
use srrm_core::gateway::{PredictionQuery, RecordGateway};
use srrm_core::run_contracts::RunState;
use srrm_core::PredictionRecord;
use srrm_insight::{aggregate_predictions, AggregateResult};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedPredictions {
    pub predictions: Vec<PredictionRecord>,
    pub aggregate: AggregateResult,
}

/// On run success, re-reads the predictions written since the trigger and
/// aggregates them. Store errors are kept on the sink.
pub struct RefreshOnSuccess<'a, G> {
    gateway: &'a G,
    since: DateTime<Utc>,
    refreshed: Option<RefreshedPredictions>,
    error: Option<String>,
}

impl<'a, G: RecordGateway> RefreshOnSuccess<'a, G> {
    pub fn new(gateway: &'a G, since: DateTime<Utc>) -> Self {
        Self {
            gateway,
            since,
            refreshed: None,
            error: None,
        }
    }

    pub fn refreshed(&self) -> Option<&RefreshedPredictions> {
        self.refreshed.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn into_refreshed(self) -> Option<RefreshedPredictions> {
        self.refreshed
    }
}

impl<G: RecordGateway> RunEventSink for RefreshOnSuccess<'_, G> {
    fn on_success(&mut self, run: &RunState) {
        match self.gateway.predictions(&PredictionQuery::since(self.since)) {
            Ok(predictions) => {
                let aggregate = aggregate_predictions(&predictions);
                info!(
                    event = "run_refresh_complete",
                    run_id = %run.run_id,
                    predictions = predictions.len(),
                    entities = aggregate.distinct_entities
                );
                self.refreshed = Some(RefreshedPredictions {
                    predictions,
                    aggregate,
                });
            }
            Err(err) => {
                warn!(event = "run_refresh_failed", run_id = %run.run_id, error = %err);
                self.error = Some(err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::Value;
    use srrm_core::run_contracts::OrchestratorRunState;
    use srrm_storage::RecordStore;

    #[test]
    fn success_aggregates_only_predictions_since_trigger() {
        let store = RecordStore::open_in_memory().expect("open store");
        let triggered_at = Utc
            .with_ymd_and_hms(2026, 5, 2, 9, 0, 0)
            .single()
            .expect("valid timestamp");
        store
            .insert_predictions(&[
                PredictionRecord::new("S1", triggered_at - Duration::days(1), "Low"),
                PredictionRecord::new("S1", triggered_at + Duration::minutes(3), "High")
                    .with_probabilities(Some(0.8), Some(0.15), Some(0.05)),
                PredictionRecord::new("S2", triggered_at + Duration::minutes(3), "medium"),
            ])
            .expect("insert predictions");

        let mut sink = RefreshOnSuccess::new(&store, triggered_at);
        sink.on_success(&RunState {
            run_id: "run-7".to_string(),
            state: OrchestratorRunState::Success,
            started_at: None,
            ended_at: None,
            detail: Value::Null,
        });

        assert!(sink.error().is_none());
        let refreshed = sink.into_refreshed().expect("refreshed predictions");
        assert_eq!(refreshed.predictions.len(), 2);
        assert_eq!(refreshed.aggregate.category_counts.high, 1);
        assert_eq!(refreshed.aggregate.category_counts.medium, 1);
        assert_eq!(refreshed.aggregate.category_counts.low, 0);
    }
}
