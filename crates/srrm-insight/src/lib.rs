pub mod aggregate;
pub mod explain;
pub mod overview;
pub mod resolver;
pub mod workflow;

pub use aggregate::{aggregate_predictions, majority_category, AggregateResult, CategoryCounts, CategoryTally};
pub use explain::{
    rank_contributions, summarize_latest_explanations, ContributionDirection, DetailView,
    EntityExplanationSummary, RankedContribution,
};
pub use overview::{build_overview, DashboardOverview};
pub use resolver::resolve_latest;
pub use workflow::{summarize_workflow_events, WorkflowEventSummary};
