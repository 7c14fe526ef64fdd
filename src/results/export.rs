//! Report export
//!
//! Writes report documents as pretty JSON and per-attempt rows as CSV.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

use super::aggregator::ReportAggregator;

/// Generate unique session id
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Write any report document as pretty JSON
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, document: &T) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let file = File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), document)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    info!("Exported report to {}", path.display());
    Ok(())
}

/// Write one CSV row per attempt; items that never ran get a single row
/// with an empty attempt column
pub fn write_csv(path: impl AsRef<Path>, aggregator: &ReportAggregator) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;

    writer.write_record([
        "item_id",
        "module",
        "attempt",
        "outcome",
        "phase",
        "duration_seconds",
        "started_at",
        "final_status",
        "flaky_confirmed",
        "message",
        "teardown_error",
    ])?;

    for report in aggregator.reports() {
        if report.attempts.is_empty() {
            writer.write_record([
                report.id().to_string(),
                report.item.module().to_string(),
                String::new(),
                report.status.as_str().to_string(),
                String::new(),
                String::new(),
                String::new(),
                report.status.as_str().to_string(),
                report.flaky_confirmed.to_string(),
                report.skip_reason.clone().unwrap_or_default(),
                String::new(),
            ])?;
            continue;
        }
        for attempt in &report.attempts {
            writer.write_record([
                report.id().to_string(),
                report.item.module().to_string(),
                attempt.attempt.to_string(),
                attempt.outcome.as_str().to_string(),
                attempt.phase.to_string(),
                format!("{:.6}", attempt.duration_seconds),
                attempt.started_at.to_rfc3339(),
                report.status.as_str().to_string(),
                report.flaky_confirmed.to_string(),
                attempt.message.clone().unwrap_or_default(),
                attempt.teardown_error.clone().unwrap_or_default(),
            ])?;
        }
    }
    writer.flush()?;

    info!("Exported attempts to {}", path.display());
    Ok(())
}
