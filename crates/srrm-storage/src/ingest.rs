//! Metric snapshot uploads. A file is validated completely before anything is
//! written; a single bad row rejects the upload.

use chrono::NaiveDate;
use serde::Serialize;
use srrm_core::gateway::RecordGateway;
use srrm_core::{parse_timestamp_lenient, FailureKind, MetricSnapshotRecord};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::{info, warn};

pub const REQUIRED_COLUMNS: [&str; 11] = [
    "supplier_id",
    "date",
    "on_time_delivery_rate",
    "quality_score",
    "geopolitical_risk_score",
    "communication_score",
    "annual_spending_rupees",
    "total_risk_score",
    "risk_category",
    "industry_segment",
    "supplier_size",
];

/// Problems reported per upload before the remainder is elided.
const MAX_REPORTED_PROBLEMS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowProblem {
    /// 1-based line number in the uploaded file, header included.
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("upload is empty")]
    Empty,
    #[error("missing required columns: {}", .missing.join(", "))]
    MissingColumns { missing: Vec<String> },
    #[error("malformed csv at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("{} invalid row(s): {}", .problems.len(), describe_problems(.problems))]
    InvalidRows { problems: Vec<RowProblem> },
    #[error("store rejected upload: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl IngestError {
    pub fn kind(&self) -> FailureKind {
        match self {
            IngestError::Store(_) => FailureKind::Upstream,
            _ => FailureKind::Validation,
        }
    }
}

fn describe_problems(problems: &[RowProblem]) -> String {
    let mut parts = problems
        .iter()
        .take(MAX_REPORTED_PROBLEMS)
        .map(|problem| format!("line {}: {}", problem.line, problem.reason))
        .collect::<Vec<_>>();
    if problems.len() > MAX_REPORTED_PROBLEMS {
        parts.push(format!("and {} more", problems.len() - MAX_REPORTED_PROBLEMS));
    }
    parts.join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub rows: usize,
    pub unique_suppliers: usize,
}

/// One parsed record plus the line it started on.
struct CsvRecord {
    line: usize,
    fields: Vec<String>,
}

/// RFC 4180 reader: quoted fields may contain separators, doubled quotes and
/// line breaks. Blank lines are skipped.
fn read_records(text: &str) -> Result<Vec<CsvRecord>, IngestError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_was_quoted = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(ch);
                }
                _ => field.push(ch),
            }
            continue;
        }

        match ch {
            '"' if field.is_empty() && !field_was_quoted => {
                in_quotes = true;
                field_was_quoted = true;
            }
            '"' => {
                return Err(IngestError::Malformed {
                    line,
                    reason: "unexpected quote inside unquoted field".to_string(),
                });
            }
            ',' => {
                fields.push(std::mem::take(&mut field));
                field_was_quoted = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\r' | '\n' => {
                fields.push(std::mem::take(&mut field));
                field_was_quoted = false;
                push_record(&mut records, record_line, std::mem::take(&mut fields));
                line += 1;
                record_line = line;
            }
            _ if field_was_quoted => {
                return Err(IngestError::Malformed {
                    line,
                    reason: "characters after closing quote".to_string(),
                });
            }
            _ => field.push(ch),
        }
    }

    if in_quotes {
        return Err(IngestError::Malformed {
            line: record_line,
            reason: "unterminated quoted field".to_string(),
        });
    }
    if !field.is_empty() || field_was_quoted || !fields.is_empty() {
        fields.push(field);
        push_record(&mut records, record_line, fields);
    }
    Ok(records)
}

fn push_record(records: &mut Vec<CsvRecord>, line: usize, fields: Vec<String>) {
    let blank = fields.len() == 1 && fields[0].trim().is_empty();
    if !blank {
        records.push(CsvRecord { line, fields });
    }
}

/// Empty or unparseable numbers are stored as missing rather than rejected.
fn parse_metric(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_snapshot_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp_lenient(trimmed).map(|ts| ts.date_naive()))
}

fn optional_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Parses and validates an upload without touching the store.
pub fn parse_snapshot_csv(text: &str) -> Result<Vec<MetricSnapshotRecord>, IngestError> {
    let mut records = read_records(text)?.into_iter();
    let header = records.next().ok_or(IngestError::Empty)?;

    let columns = header
        .fields
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim().to_string(), idx))
        .collect::<HashMap<_, _>>();
    let missing = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !columns.contains_key(**column))
        .map(|column| column.to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns { missing });
    }
    let col = |name: &str| columns.get(name).copied().unwrap_or_default();
    let width = header.fields.len();

    let mut snapshots = Vec::new();
    let mut problems = Vec::new();
    for record in records {
        if record.fields.len() != width {
            problems.push(RowProblem {
                line: record.line,
                reason: format!(
                    "expected {width} fields, found {}",
                    record.fields.len()
                ),
            });
            continue;
        }
        let field = |name: &str| record.fields[col(name)].as_str();

        let entity_id = field("supplier_id").trim();
        if entity_id.is_empty() {
            problems.push(RowProblem {
                line: record.line,
                reason: "supplier_id is empty".to_string(),
            });
            continue;
        }
        let Some(date) = parse_snapshot_date(field("date")) else {
            problems.push(RowProblem {
                line: record.line,
                reason: format!("unparseable date `{}`", field("date").trim()),
            });
            continue;
        };

        snapshots.push(MetricSnapshotRecord {
            entity_id: entity_id.to_string(),
            date,
            on_time_delivery_rate: parse_metric(field("on_time_delivery_rate")),
            quality_score: parse_metric(field("quality_score")),
            geopolitical_risk_score: parse_metric(field("geopolitical_risk_score")),
            communication_score: parse_metric(field("communication_score")),
            annual_spending_rupees: parse_metric(field("annual_spending_rupees")),
            total_risk_score: parse_metric(field("total_risk_score")),
            risk_category: optional_text(field("risk_category")),
            industry_segment: optional_text(field("industry_segment")),
            supplier_size: optional_text(field("supplier_size")),
            scored: false,
        });
    }

    if !problems.is_empty() {
        return Err(IngestError::InvalidRows { problems });
    }
    Ok(snapshots)
}

/// Validates the whole upload, then inserts every row in one batch as
/// not-yet-scored.
pub fn ingest_snapshot_csv<G>(gateway: &G, text: &str) -> Result<IngestReport, IngestError>
where
    G: RecordGateway,
{
    let snapshots = match parse_snapshot_csv(text) {
        Ok(snapshots) => snapshots,
        Err(err) => {
            warn!(event = "snapshot_upload_rejected", error = %err);
            return Err(err);
        }
    };

    let unique_suppliers = snapshots
        .iter()
        .map(|snapshot| snapshot.entity_id.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let rows = gateway
        .insert_snapshots(&snapshots)
        .map_err(|err| IngestError::Store(Box::new(err)))?;

    info!(
        event = "snapshot_upload_ingested",
        rows,
        unique_suppliers
    );
    Ok(IngestReport {
        rows,
        unique_suppliers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordStore;
    use srrm_core::gateway::SnapshotQuery;

    const HEADER: &str = "supplier_id,date,on_time_delivery_rate,quality_score,geopolitical_risk_score,communication_score,annual_spending_rupees,total_risk_score,risk_category,industry_segment,supplier_size";

    fn upload(rows: &[&str]) -> String {
        let mut text = String::from(HEADER);
        for row in rows {
            text.push_str("\r\n");
            text.push_str(row);
        }
        text
    }

    #[test]
    fn valid_upload_is_inserted_unscored() {
        let store = RecordStore::open_in_memory().expect("open db");
        let text = upload(&[
            "S1,2026-03-01,0.91,82,3.5,7,1200000,41,Medium,Electronics,Large",
            "S1,2026-03-02,0.88,,n/a,7,\"1,250,000\",44,Medium,Electronics,Large",
            "S2,2026-03-01,0.75,60,6,5,400000,71,High,\"Chemicals, Specialty\",Small",
        ]);

        let report = ingest_snapshot_csv(&store, &text).expect("ingest");
        assert_eq!(
            report,
            IngestReport {
                rows: 3,
                unique_suppliers: 2
            }
        );

        let rows = store
            .snapshots(&SnapshotQuery {
                entity_id: Some("S1".to_string()),
                ..SnapshotQuery::default()
            })
            .expect("rows");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| !row.scored));
        assert_eq!(rows[0].quality_score, None);
        assert_eq!(rows[0].geopolitical_risk_score, None);
        assert_eq!(rows[0].annual_spending_rupees, None);
        assert_eq!(rows[1].annual_spending_rupees, Some(1_200_000.0));

        let chemicals = store
            .snapshots(&SnapshotQuery {
                entity_id: Some("S2".to_string()),
                ..SnapshotQuery::default()
            })
            .expect("rows");
        assert_eq!(
            chemicals[0].industry_segment.as_deref(),
            Some("Chemicals, Specialty")
        );
    }

    #[test]
    fn comma_numbers_are_missing_not_rescaled() {
        assert_eq!(parse_metric("0,91"), None);
        assert_eq!(parse_metric("1,5"), None);
        assert_eq!(parse_metric("1,250,000"), None);
        assert_eq!(parse_metric(" 0.91 "), Some(0.91));
        assert_eq!(parse_metric("NaN"), None);
    }

    #[test]
    fn missing_columns_are_listed() {
        let err = parse_snapshot_csv("supplier_id,date,quality_score\nS1,2026-03-01,80")
            .expect_err("missing columns");
        match err {
            IngestError::MissingColumns { missing } => {
                assert_eq!(missing.len(), 8);
                assert!(missing.contains(&"risk_category".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn one_bad_row_rejects_whole_upload() {
        let store = RecordStore::open_in_memory().expect("open db");
        let text = upload(&[
            "S1,2026-03-01,0.91,82,3.5,7,1200000,41,Medium,Electronics,Large",
            ",2026-03-01,0.91,82,3.5,7,1200000,41,Medium,Electronics,Large",
            "S3,someday,0.91,82,3.5,7,1200000,41,Medium,Electronics,Large",
            "S4,2026-03-01,0.91",
        ]);

        let err = ingest_snapshot_csv(&store, &text).expect_err("rejected");
        assert_eq!(err.kind(), FailureKind::Validation);
        match &err {
            IngestError::InvalidRows { problems } => {
                let lines = problems.iter().map(|p| p.line).collect::<Vec<_>>();
                assert_eq!(lines, vec![3, 4, 5]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("supplier_id is empty"));
        assert_eq!(
            store
                .count_snapshots(&SnapshotQuery::default())
                .expect("count"),
            0
        );
    }

    #[test]
    fn reader_handles_quotes_and_multiline_fields() {
        let records = read_records("a,b\n\"x \"\"y\"\"\",\"line1\nline2\"\n\n").expect("parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].fields, vec!["x \"y\"", "line1\nline2"]);
        assert_eq!(records[1].line, 2);

        let err = read_records("a,b\n\"open,1").err().expect("unterminated");
        assert!(matches!(err, IngestError::Malformed { line: 2, .. }));
    }

    #[test]
    fn empty_upload_is_rejected() {
        assert!(matches!(parse_snapshot_csv(""), Err(IngestError::Empty)));
        assert!(matches!(
            parse_snapshot_csv("\u{feff}\n\n"),
            Err(IngestError::Empty)
        ));
    }
}
