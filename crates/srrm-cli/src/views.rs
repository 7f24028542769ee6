use crate::config::AppConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use serde_json::json;
use srrm_core::gateway::{
    ExplanationQuery, Page, PredictionQuery, PredictionSortKey, RecordGateway, SnapshotQuery,
    SortOrder,
};
use srrm_core::{parse_timestamp_lenient, DecodeStatus, PredictionRecord, RiskCategory};
use srrm_insight::explain::{DETAIL_TOP_PER_DIRECTION, SUMMARY_TOP};
use srrm_insight::{
    build_overview, rank_contributions, resolve_latest, summarize_latest_explanations,
    summarize_workflow_events, AggregateResult, DetailView, RankedContribution,
};
use srrm_storage::RecordStore;

pub const DEFAULT_PAGE_SIZE: usize = 50;

fn parse_since(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp_lenient(raw).ok_or_else(|| format!("invalid timestamp: {raw}"))
}

#[derive(Args, Debug)]
pub struct PredictionArgs {
    #[arg(long)]
    pub entity: Option<String>,
    /// High, Medium, Low or Unknown (any casing)
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long, value_parser = parse_since)]
    pub since: Option<DateTime<Utc>>,
    #[arg(long, default_value = "observed_at")]
    pub sort: PredictionSortKey,
    #[arg(long)]
    pub asc: bool,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub limit: usize,
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
}

#[derive(Args, Debug)]
pub struct SnapshotArgs {
    #[arg(long)]
    pub entity: Option<String>,
    #[arg(long)]
    pub risk_category: Option<String>,
    #[arg(long)]
    pub industry: Option<String>,
    /// Only rows the pipeline has not scored yet
    #[arg(long)]
    pub unscored: bool,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub limit: usize,
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
}

#[derive(Args, Debug)]
pub struct ExplainSummaryArgs {
    #[arg(long, default_value_t = SUMMARY_TOP)]
    pub top: usize,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fmt_prob(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"))
}

fn print_prediction_row(record: &PredictionRecord) {
    println!(
        "{:<12} {:<25} {:<8} high={} medium={} low={}",
        record.entity_id,
        record.observed_at.format("%Y-%m-%d %H:%M:%S"),
        record.predicted_category.as_str(),
        fmt_prob(record.prob_high),
        fmt_prob(record.prob_medium),
        fmt_prob(record.prob_low),
    );
}

pub fn print_aggregate(aggregate: &AggregateResult) {
    let counts = &aggregate.category_counts;
    println!(
        "Suppliers by majority risk: High {} | Medium {} | Low {} | Unknown {}",
        counts.high, counts.medium, counts.low, counts.unknown
    );
    let records = &aggregate.record_category_counts;
    println!(
        "Predictions by risk:        High {} | Medium {} | Low {} | Unknown {}",
        records.high, records.medium, records.low, records.unknown
    );
    match aggregate.average_prob_high {
        Some(avg) => println!("Average high-risk probability: {avg:.3}"),
        None => println!("Average high-risk probability: n/a"),
    }
    if !aggregate.top_high_risk.is_empty() {
        println!("Top high-risk predictions:");
        for record in &aggregate.top_high_risk {
            print_prediction_row(record);
        }
    }
}

pub fn overview(config: &AppConfig, store: &RecordStore) -> Result<()> {
    let snapshot = store
        .overview_snapshot()
        .context("Failed to read overview data")?;
    let overview = build_overview(&snapshot);
    if config.json {
        return print_json(&overview);
    }
    println!("Total suppliers:    {}", overview.total_suppliers);
    println!("Supplier profiles:  {}", overview.total_profiles);
    println!("Total predictions:  {}", overview.total_predictions);
    println!("Unscored snapshots: {}", overview.unscored_snapshots);
    print_aggregate(&overview.aggregate);
    Ok(())
}

pub fn predictions(config: &AppConfig, store: &RecordStore, args: &PredictionArgs) -> Result<()> {
    let filter = PredictionQuery {
        entity_id: args.entity.clone(),
        observed_since: args.since,
        category: args.category.as_deref().map(RiskCategory::normalize),
        sort: args.sort,
        order: if args.asc {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        },
        page: None,
    };
    let total = store
        .count_predictions(&filter)
        .context("Failed to count predictions")?;
    let rows = store
        .predictions(&PredictionQuery {
            page: Some(Page {
                offset: args.offset,
                limit: args.limit,
            }),
            ..filter
        })
        .context("Failed to read predictions")?;

    if config.json {
        return print_json(&json!({ "total": total, "rows": rows }));
    }
    println!("Showing {} of {} predictions", rows.len(), total);
    for record in &rows {
        print_prediction_row(record);
    }
    Ok(())
}

pub fn snapshots(config: &AppConfig, store: &RecordStore, args: &SnapshotArgs) -> Result<()> {
    let filter = SnapshotQuery {
        entity_id: args.entity.clone(),
        risk_category: args.risk_category.clone(),
        industry_segment: args.industry.clone(),
        scored: args.unscored.then_some(false),
        page: None,
    };
    let total = store
        .count_snapshots(&filter)
        .context("Failed to count snapshots")?;
    let rows = store
        .snapshots(&SnapshotQuery {
            page: Some(Page {
                offset: args.offset,
                limit: args.limit,
            }),
            ..filter
        })
        .context("Failed to read snapshots")?;

    if config.json {
        return print_json(&json!({ "total": total, "rows": rows }));
    }
    println!("Showing {} of {} snapshots", rows.len(), total);
    for row in &rows {
        println!(
            "{:<12} {} {:<8} {:<20} score={} {}",
            row.entity_id,
            row.date,
            row.risk_category.as_deref().unwrap_or("-"),
            row.industry_segment.as_deref().unwrap_or("-"),
            fmt_prob(row.total_risk_score),
            if row.scored { "scored" } else { "unscored" }
        );
    }
    Ok(())
}

fn print_contributions(title: &str, entries: &[RankedContribution]) {
    println!("{title}:");
    if entries.is_empty() {
        println!("  (none)");
    }
    for entry in entries {
        println!("  {:<32} {:+.4}", entry.feature, entry.value);
    }
}

pub fn explain(config: &AppConfig, store: &RecordStore, entity: &str) -> Result<()> {
    let predictions = store
        .predictions(&PredictionQuery::for_entity(entity))
        .context("Failed to read predictions")?;
    let explanations = store
        .explanations(&ExplanationQuery {
            entity_id: Some(entity.to_string()),
            observed_since: None,
        })
        .context("Failed to read explanations")?;

    let latest_prediction = resolve_latest(&predictions).remove(entity);
    // Prefer the explanation written with the latest prediction.
    let paired = latest_prediction.as_ref().and_then(|prediction| {
        explanations
            .iter()
            .find(|explanation| explanation.matches(entity, prediction.observed_at))
            .cloned()
    });
    let Some(explanation) = paired.or_else(|| resolve_latest(&explanations).remove(entity)) else {
        println!("No explanations recorded for {entity}");
        return Ok(());
    };

    let decoded = explanation.contributions.decode();
    let ranked = rank_contributions(&decoded.contributions);
    let detail = DetailView::from_ranked(&ranked, DETAIL_TOP_PER_DIRECTION);
    let degraded = match &decoded.status {
        DecodeStatus::Degraded { reason } => Some(reason.as_str()),
        DecodeStatus::Decoded | DecodeStatus::Missing => None,
    };

    if config.json {
        return print_json(&json!({
            "entity_id": entity,
            "observed_at": explanation.observed_at,
            "prediction": latest_prediction,
            "degraded": degraded,
            "detail": detail,
        }));
    }

    println!(
        "Explanation for {entity} at {}",
        explanation.observed_at.to_rfc3339()
    );
    if let Some(prediction) = &latest_prediction {
        println!(
            "Latest prediction: {} (high={})",
            prediction.predicted_category,
            fmt_prob(prediction.prob_high)
        );
    }
    if let Some(reason) = degraded {
        println!("Contribution payload could not be decoded: {reason}");
    }
    print_contributions("Increases risk", &detail.increases);
    print_contributions("Reduces risk", &detail.reduces);
    Ok(())
}

pub fn explain_summary(
    config: &AppConfig,
    store: &RecordStore,
    args: &ExplainSummaryArgs,
) -> Result<()> {
    let explanations = store
        .explanations(&ExplanationQuery::default())
        .context("Failed to read explanations")?;
    let summaries = summarize_latest_explanations(&explanations, args.top);

    if config.json {
        return print_json(&summaries);
    }
    for summary in &summaries {
        let top = summary
            .top
            .iter()
            .map(|entry| format!("{} {:+.3} ({})", entry.feature, entry.value, entry.direction.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        match &summary.degraded {
            Some(reason) => println!("{:<12} [undecodable: {reason}]", summary.entity_id),
            None => println!("{:<12} {top}", summary.entity_id),
        }
    }
    Ok(())
}

pub fn events(config: &AppConfig, store: &RecordStore) -> Result<()> {
    let events = store
        .workflow_events()
        .context("Failed to read workflow events")?;
    let summary = summarize_workflow_events(&events);

    if config.json {
        return print_json(&summary);
    }
    println!(
        "Tickets created: {} | Notifications sent: {}",
        summary.tickets_created, summary.notifications_sent
    );
    for event in &summary.events {
        println!(
            "{} {:<12} {}",
            event.created_at.format("%Y-%m-%d %H:%M:%S"),
            event.entity_id,
            event.label
        );
    }
    Ok(())
}
