use std::path::Path;
use csv::Writer;
use log::info;
use serde::Serialize;
use crate::analyzers::duplicate::DuplicateGroup;
use crate::pipeline::{BatchReport, FileStatus};
use crate::Result;

#[derive(Debug, Serialize)]
struct BatchRow<'a> {
    source: String,
    status: &'a str,
    gain_db: Option<String>,
    outputs: String,
    detail: &'a str,
}

#[derive(Debug, Serialize)]
struct DuplicateRow<'a> {
    content_hash: &'a str,
    kept: String,
    skipped: String,
}

fn status_label(status: FileStatus) -> &'static str {
    match status {
        FileStatus::Exported => "exported",
        FileStatus::Skipped => "skipped",
        FileStatus::Failed => "failed",
        FileStatus::Cancelled => "cancelled",
    }
}

fn join_paths<'a>(paths: impl IntoIterator<Item = &'a Path>) -> String {
    paths
        .into_iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Default)]
pub struct Reporter;

impl Reporter {
    pub fn new() -> Self {
        Self
    }

    /// One row per source file, including files that failed to decode
    /// during the scan.
    pub fn write_batch_report(&self, report: &BatchReport, output_path: impl AsRef<Path>) -> Result<()> {
        let output_path_ref = output_path.as_ref();
        let mut writer = Writer::from_path(output_path_ref)?;

        for outcome in &report.outcomes {
            writer.serialize(BatchRow {
                source: outcome.source.display().to_string(),
                status: status_label(outcome.status),
                gain_db: outcome.gain_db.map(|g| format!("{:+.2}", g)),
                outputs: join_paths(outcome.outputs.iter().map(|p| p.as_path())),
                detail: outcome.detail.as_deref().unwrap_or(""),
            })?;
        }
        for failure in &report.scan_failures {
            writer.serialize(BatchRow {
                source: failure.path.display().to_string(),
                status: "unreadable",
                gain_db: None,
                outputs: String::new(),
                detail: &failure.reason,
            })?;
        }

        writer.flush()?;
        info!("Batch report generated: {}", output_path_ref.display());
        Ok(())
    }

    pub fn write_duplicate_report(&self, groups: &[DuplicateGroup], output_path: impl AsRef<Path>) -> Result<()> {
        let output_path_ref = output_path.as_ref();
        let mut writer = Writer::from_path(output_path_ref)?;

        for group in groups {
            writer.serialize(DuplicateRow {
                content_hash: group.hash.as_str(),
                kept: group.keeper.display().to_string(),
                skipped: join_paths(group.duplicates.iter().map(|p| p.as_path())),
            })?;
        }

        writer.flush()?;
        info!("Duplicate report generated: {}", output_path_ref.display());
        Ok(())
    }
}
