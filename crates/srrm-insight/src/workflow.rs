use chrono::{DateTime, Utc};
use serde::Serialize;
use srrm_core::WorkflowEvent;

pub const TICKET_CREATED: &str = "TICKET_CREATED";
pub const NOTIFICATION_SENT: &str = "NOTIFICATION_SENT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledWorkflowEvent {
    pub entity_id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowEventSummary {
    pub events: Vec<LabeledWorkflowEvent>,
    pub tickets_created: usize,
    pub notifications_sent: usize,
}

pub fn event_label(event_type: &str) -> String {
    let lower = event_type.to_lowercase();
    if lower.contains("ticket") {
        "Ticket Created".to_string()
    } else if lower.contains("notification") {
        "Notification Sent".to_string()
    } else {
        event_type.to_string()
    }
}

/// Newest first, with per-type counters for the two worker outputs.
pub fn summarize_workflow_events(events: &[WorkflowEvent]) -> WorkflowEventSummary {
    let mut labeled = events
        .iter()
        .map(|event| LabeledWorkflowEvent {
            entity_id: event.entity_id.clone(),
            label: event_label(&event.event_type),
            created_at: event.created_at,
        })
        .collect::<Vec<_>>();
    labeled.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    WorkflowEventSummary {
        events: labeled,
        tickets_created: events
            .iter()
            .filter(|event| event.event_type == TICKET_CREATED)
            .count(),
        notifications_sent: events
            .iter()
            .filter(|event| event.event_type == NOTIFICATION_SENT)
            .count(),
    }
}
