pub mod export;
pub mod ingest;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use srrm_core::gateway::{
    ExplanationQuery, HealthReport, OverviewSnapshot, PredictionQuery, PredictionSortKey,
    RecordGateway, SnapshotQuery, SortOrder,
};
use srrm_core::{
    parse_timestamp_lenient, ContributionPayload, EntityProfile, ExplanationRecord, FailureKind,
    MetricSnapshotRecord, PredictionRecord, WorkflowEvent,
};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

pub const SRRM_SCHEMA_VERSION: i64 = 1;

pub const PROFILE_TABLE: &str = "supplier_profile";
pub const SNAPSHOT_TABLE: &str = "supplier_risk_master";
pub const PREDICTION_TABLE: &str = "risk_prediction_history";
pub const EXPLANATION_TABLE: &str = "shap_explanations";
pub const WORKFLOW_EVENT_TABLE: &str = "workflow_events";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

impl StorageError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StorageError::Sqlite(_) | StorageError::UnsupportedSchemaVersion { .. } => {
                FailureKind::Upstream
            }
            StorageError::Serialization(_) | StorageError::Timestamp(_) => FailureKind::Data,
        }
    }
}

pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > SRRM_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: SRRM_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_srrm_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }
}

impl RecordGateway for RecordStore {
    type Error = StorageError;

    fn upsert_profiles(&self, profiles: &[EntityProfile]) -> Result<usize, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                "
                INSERT INTO supplier_profile (
                    supplier_id,
                    supplier_name,
                    industry_segment,
                    supplier_size,
                    region
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(supplier_id) DO UPDATE SET
                    supplier_name=excluded.supplier_name,
                    industry_segment=excluded.industry_segment,
                    supplier_size=excluded.supplier_size,
                    region=excluded.region
                ",
            )?;
            for profile in profiles {
                written += stmt.execute(params![
                    profile.entity_id,
                    profile.display_name,
                    profile.industry_segment,
                    profile.supplier_size,
                    profile.region,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn profiles(&self) -> Result<Vec<EntityProfile>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT supplier_id, supplier_name, industry_segment, supplier_size, region
            FROM supplier_profile
            ORDER BY supplier_id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EntityProfile {
                entity_id: row.get(0)?,
                display_name: row.get(1)?,
                industry_segment: row.get(2)?,
                supplier_size: row.get(3)?,
                region: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn insert_snapshots(&self, snapshots: &[MetricSnapshotRecord]) -> Result<usize, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                "
                INSERT INTO supplier_risk_master (
                    supplier_id,
                    date,
                    on_time_delivery_rate,
                    quality_score,
                    geopolitical_risk_score,
                    communication_score,
                    annual_spending_rupees,
                    total_risk_score,
                    risk_category,
                    industry_segment,
                    supplier_size,
                    is_predicted
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ",
            )?;
            for snapshot in snapshots {
                written += stmt.execute(params![
                    snapshot.entity_id,
                    format_date(snapshot.date),
                    snapshot.on_time_delivery_rate,
                    snapshot.quality_score,
                    snapshot.geopolitical_risk_score,
                    snapshot.communication_score,
                    snapshot.annual_spending_rupees,
                    snapshot.total_risk_score,
                    snapshot.risk_category,
                    snapshot.industry_segment,
                    snapshot.supplier_size,
                    snapshot.scored,
                ])?;
            }
        }
        tx.commit()?;
        debug!(event = "snapshots_inserted", rows = written);
        Ok(written)
    }

    fn snapshots(&self, query: &SnapshotQuery) -> Result<Vec<MetricSnapshotRecord>, StorageError> {
        let (clause, mut args) = snapshot_filter(query);
        let mut sql = format!(
            "
            SELECT supplier_id, date, on_time_delivery_rate, quality_score,
                   geopolitical_risk_score, communication_score, annual_spending_rupees,
                   total_risk_score, risk_category, industry_segment, supplier_size, is_predicted
            FROM supplier_risk_master
            {clause}
            ORDER BY date DESC, row_id ASC
            "
        );
        push_page(&mut sql, &mut args, query.page);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), snapshot_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn count_snapshots(&self, query: &SnapshotQuery) -> Result<usize, StorageError> {
        let (clause, args) = snapshot_filter(query);
        count(
            &self.conn,
            &format!("SELECT COUNT(*) FROM supplier_risk_master {clause}"),
            &args,
        )
    }

    fn mark_scored(&self, entity_id: &str, date: NaiveDate) -> Result<usize, StorageError> {
        Ok(self.conn.execute(
            "
            UPDATE supplier_risk_master
            SET is_predicted = 1
            WHERE supplier_id = ?1 AND date = ?2
            ",
            params![entity_id, format_date(date)],
        )?)
    }

    fn insert_predictions(&self, predictions: &[PredictionRecord]) -> Result<usize, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                "
                INSERT INTO risk_prediction_history (
                    supplier_id,
                    date,
                    predicted_risk,
                    risk_category,
                    prob_high,
                    prob_medium,
                    prob_low,
                    model_version,
                    prediction_date
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ",
            )?;
            for prediction in predictions {
                written += stmt.execute(params![
                    prediction.entity_id,
                    prediction.snapshot_date.map(format_date),
                    prediction.raw_category,
                    prediction.predicted_category.as_str(),
                    prediction.prob_high,
                    prediction.prob_medium,
                    prediction.prob_low,
                    prediction.model_version,
                    format_timestamp(prediction.observed_at),
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn predictions(&self, query: &PredictionQuery) -> Result<Vec<PredictionRecord>, StorageError> {
        query_predictions(&self.conn, query)
    }

    fn count_predictions(&self, query: &PredictionQuery) -> Result<usize, StorageError> {
        let (clause, args) = prediction_filter(query);
        count(
            &self.conn,
            &format!("SELECT COUNT(*) FROM risk_prediction_history {clause}"),
            &args,
        )
    }

    fn insert_explanations(
        &self,
        explanations: &[ExplanationRecord],
    ) -> Result<usize, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                "
                INSERT INTO shap_explanations (supplier_id, prediction_date, shap_values)
                VALUES (?1, ?2, ?3)
                ",
            )?;
            for explanation in explanations {
                written += stmt.execute(params![
                    explanation.entity_id,
                    format_timestamp(explanation.observed_at),
                    explanation.contributions.to_storage_text(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn explanations(
        &self,
        query: &ExplanationQuery,
    ) -> Result<Vec<ExplanationRecord>, StorageError> {
        let mut clauses = Vec::new();
        let mut args = Vec::new();
        if let Some(entity_id) = query.entity_id.as_ref() {
            args.push(SqlValue::Text(entity_id.clone()));
            clauses.push(format!("supplier_id = ?{}", args.len()));
        }
        if let Some(since) = query.observed_since {
            args.push(SqlValue::Text(format_timestamp(since)));
            clauses.push(format!("prediction_date >= ?{}", args.len()));
        }
        let sql = format!(
            "
            SELECT supplier_id, prediction_date, shap_values
            FROM shap_explanations
            {}
            ORDER BY prediction_date DESC, row_id ASC
            ",
            where_clause(&clauses)
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            let shap_values: Option<String> = row.get(2)?;
            Ok(ExplanationRecord {
                entity_id: row.get(0)?,
                observed_at: timestamp_column(row, 1)?,
                // Raw text stays encoded; callers decode per record.
                contributions: shap_values
                    .map(ContributionPayload::encoded)
                    .unwrap_or_else(|| ContributionPayload(Value::Null)),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn insert_workflow_events(&self, events: &[WorkflowEvent]) -> Result<usize, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                "
                INSERT INTO workflow_events (supplier_id, event_type, detail, created_at)
                VALUES (?1, ?2, ?3, ?4)
                ",
            )?;
            for event in events {
                written += stmt.execute(params![
                    event.entity_id,
                    event.event_type,
                    event.detail,
                    format_timestamp(event.created_at),
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn workflow_events(&self) -> Result<Vec<WorkflowEvent>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT supplier_id, event_type, detail, created_at
            FROM workflow_events
            ORDER BY created_at DESC, row_id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(WorkflowEvent {
                entity_id: row.get(0)?,
                event_type: row.get(1)?,
                detail: row.get(2)?,
                created_at: timestamp_column(row, 3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// All overview inputs come from one read transaction so the counts and
    /// the prediction history describe the same moment.
    fn overview_snapshot(&self) -> Result<OverviewSnapshot, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let predictions = query_predictions(&tx, &PredictionQuery::all())?;
        let snapshot_entities = count(
            &tx,
            "SELECT COUNT(DISTINCT supplier_id) FROM supplier_risk_master",
            &[],
        )?;
        let unscored_snapshots = count(
            &tx,
            "SELECT COUNT(*) FROM supplier_risk_master WHERE is_predicted = 0",
            &[],
        )?;
        let profiles = count(&tx, "SELECT COUNT(*) FROM supplier_profile", &[])?;
        tx.commit()?;

        Ok(OverviewSnapshot {
            predictions,
            snapshot_entities,
            unscored_snapshots,
            profiles,
        })
    }

    fn health(&self) -> HealthReport {
        match self
            .conn
            .query_row("SELECT supplier_id FROM supplier_profile LIMIT 1", [], |_| Ok(()))
            .optional()
        {
            Ok(_) => HealthReport::reachable(None),
            Err(err) => {
                debug!(event = "store_health_failed", error = %err);
                HealthReport::unreachable(None)
            }
        }
    }
}

fn query_predictions(
    conn: &Connection,
    query: &PredictionQuery,
) -> Result<Vec<PredictionRecord>, StorageError> {
    let (clause, mut args) = prediction_filter(query);
    let direction = match query.order {
        SortOrder::Ascending => "ASC",
        SortOrder::Descending => "DESC",
    };
    let sort_expr = match query.sort {
        PredictionSortKey::ObservedAt => "prediction_date",
        PredictionSortKey::ProbHigh => "COALESCE(prob_high, 0)",
        PredictionSortKey::ProbMedium => "COALESCE(prob_medium, 0)",
        PredictionSortKey::ProbLow => "COALESCE(prob_low, 0)",
    };
    let mut sql = format!(
        "
        SELECT supplier_id, prediction_date, predicted_risk, prob_high, prob_medium,
               prob_low, model_version, date
        FROM risk_prediction_history
        {clause}
        ORDER BY {sort_expr} {direction}, row_id ASC
        "
    );
    push_page(&mut sql, &mut args, query.page);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
        let raw_category: String = row.get(2)?;
        let mut record = PredictionRecord::new(
            row.get::<_, String>(0)?,
            timestamp_column(row, 1)?,
            raw_category,
        )
        .with_probabilities(row.get(3)?, row.get(4)?, row.get(5)?);
        record.model_version = row.get(6)?;
        record.snapshot_date = optional_date_column(row, 7)?;
        Ok(record)
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn prediction_filter(query: &PredictionQuery) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut args = Vec::new();
    if let Some(entity_id) = query.entity_id.as_ref() {
        args.push(SqlValue::Text(entity_id.clone()));
        clauses.push(format!("supplier_id = ?{}", args.len()));
    }
    if let Some(since) = query.observed_since {
        args.push(SqlValue::Text(format_timestamp(since)));
        clauses.push(format!("prediction_date >= ?{}", args.len()));
    }
    if let Some(category) = query.category {
        args.push(SqlValue::Text(category.as_str().to_string()));
        clauses.push(format!("risk_category = ?{}", args.len()));
    }
    (where_clause(&clauses), args)
}

fn snapshot_filter(query: &SnapshotQuery) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut args = Vec::new();
    if let Some(entity_id) = query.entity_id.as_ref() {
        args.push(SqlValue::Text(entity_id.clone()));
        clauses.push(format!("supplier_id = ?{}", args.len()));
    }
    if let Some(category) = query.risk_category.as_ref() {
        args.push(SqlValue::Text(category.clone()));
        clauses.push(format!("risk_category = ?{}", args.len()));
    }
    if let Some(segment) = query.industry_segment.as_ref() {
        args.push(SqlValue::Text(segment.clone()));
        clauses.push(format!("industry_segment = ?{}", args.len()));
    }
    if let Some(scored) = query.scored {
        args.push(SqlValue::Integer(i64::from(scored)));
        clauses.push(format!("is_predicted = ?{}", args.len()));
    }
    (where_clause(&clauses), args)
}

fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

fn push_page(sql: &mut String, args: &mut Vec<SqlValue>, page: Option<srrm_core::gateway::Page>) {
    let Some(page) = page else {
        return;
    };
    args.push(SqlValue::Integer(page.limit.min(i64::MAX as usize) as i64));
    let limit_idx = args.len();
    args.push(SqlValue::Integer(page.offset.min(i64::MAX as usize) as i64));
    let offset_idx = args.len();
    sql.push_str(&format!(" LIMIT ?{limit_idx} OFFSET ?{offset_idx}"));
}

fn count(conn: &Connection, sql: &str, args: &[SqlValue]) -> Result<usize, StorageError> {
    let value: i64 = conn.query_row(sql, params_from_iter(args.iter()), |row| row.get(0))?;
    Ok(value.max(0) as usize)
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<MetricSnapshotRecord> {
    let date: String = row.get(1)?;
    let date = parse_date(&date).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(MetricSnapshotRecord {
        entity_id: row.get(0)?,
        date,
        on_time_delivery_rate: row.get(2)?,
        quality_score: row.get(3)?,
        geopolitical_risk_score: row.get(4)?,
        communication_score: row.get(5)?,
        annual_spending_rupees: row.get(6)?,
        total_risk_score: row.get(7)?,
        risk_category: row.get(8)?,
        industry_segment: row.get(9)?,
        supplier_size: row.get(10)?,
        scored: row.get(11)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn optional_date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| parse_date(&value))
        .transpose()
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

/// Fixed-width UTC form so lexical order in SQLite matches time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    parse_timestamp_lenient(&value)
        .ok_or_else(|| StorageError::Timestamp(format!("unrecognized timestamp: {value}")))
}

fn parse_date(value: &str) -> Result<NaiveDate, StorageError> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| {
            parse_timestamp_lenient(trimmed)
                .map(|ts| ts.date_naive())
                .ok_or_else(|| StorageError::Timestamp(format!("unrecognized date: {trimmed}")))
        })
}
