use crate::config::AppConfig;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use srrm_storage::export::{export_file_name, export_table, ExportTable};
use srrm_storage::ingest::ingest_snapshot_csv;
use srrm_storage::RecordStore;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// profiles, snapshots, predictions, explanations or events
    pub table: ExportTable,
    /// Output file; defaults to `<table>_<timestamp>.csv` in the current directory
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn ingest(config: &AppConfig, store: &RecordStore, path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let report = ingest_snapshot_csv(store, &text)
        .with_context(|| format!("Upload {} was not accepted", path.display()))?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Stored {} rows for {} suppliers; run `srrm trigger` to score them",
            report.rows, report.unique_suppliers
        );
    }
    Ok(())
}

/// Writes the table and returns the path written, or `None` when the table
/// holds no rows.
pub fn write_export(
    store: &RecordStore,
    table: ExportTable,
    out: Option<&Path>,
) -> Result<Option<PathBuf>> {
    let csv = export_table(store, table)
        .with_context(|| format!("Failed to export {table}"))?;
    if csv.is_empty() {
        return Ok(None);
    }
    let path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(export_file_name(table.table_name(), Utc::now())));
    fs::write(&path, csv).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(Some(path))
}

pub fn export(store: &RecordStore, args: &ExportArgs) -> Result<()> {
    match write_export(store, args.table, args.out.as_deref())? {
        Some(path) => {
            info!(event = "table_exported", table = %args.table, path = %path.display());
            println!("Wrote {}", path.display());
        }
        None => {
            warn!(event = "table_export_empty", table = %args.table);
            println!("{} has no rows to export", args.table);
        }
    }
    Ok(())
}
