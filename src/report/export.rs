//! Tabular and JSON exports.

use crate::models::{AnalysisOutcome, BatchReport, SiteAnalysisRecord};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Column names of the flat summary. Depends only on the analyzer schema and
/// the pass-through columns.
pub fn summary_header(schema: &[String], extra_columns: &[String]) -> Vec<String> {
    let mut header: Vec<String> = ["site_id", "source", "latitude", "longitude", "classification"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for name in schema {
        header.push(format!("{}_status", name));
        header.push(format!("{}_detail", name));
    }
    // Pass-through columns that clash with a generated column are prefixed.
    for column in extra_columns {
        let mut name = column.clone();
        while header.contains(&name) {
            name = format!("input_{}", name);
        }
        header.push(name);
    }
    header
}

/// One flat row, aligned with [`summary_header`].
pub fn summary_row(
    record: &SiteAnalysisRecord,
    schema: &[String],
    extra_columns: &[String],
    null_marker: &str,
) -> Vec<String> {
    let mut row = vec![
        record.site.site_id.clone(),
        record.site.source.clone(),
        record.site.latitude.to_string(),
        record.site.longitude.to_string(),
        record.classification.to_string(),
    ];

    for name in schema {
        match record.outcome(name) {
            Some(outcome) => {
                row.push(outcome.status_label().to_string());
                row.push(detail(outcome).unwrap_or_else(|| null_marker.to_string()));
            }
            None => {
                row.push(null_marker.to_string());
                row.push(null_marker.to_string());
            }
        }
    }

    for column in extra_columns {
        let value = match record.site.attributes.get(column) {
            Some(raw) if !raw.is_empty() => raw.clone(),
            _ => null_marker.to_string(),
        };
        row.push(value);
    }

    row
}

fn detail(outcome: &AnalysisOutcome) -> Option<String> {
    match outcome {
        AnalysisOutcome::Success(payload) => Some(payload.to_string()),
        AnalysisOutcome::Error(message) => Some(message.clone()),
        AnalysisOutcome::Timeout => None,
    }
}

/// Write summary rows for `records` to `path`.
pub fn write_summary_csv<'a>(
    path: &Path,
    records: impl Iterator<Item = &'a SiteAnalysisRecord>,
    report: &BatchReport,
    null_marker: &str,
) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));

    writer
        .write_record(summary_header(&report.analyzer_schema, &report.extra_columns))
        .with_context(|| format!("Failed to write header to {}", path.display()))?;

    for record in records {
        writer
            .write_record(summary_row(
                record,
                &report.analyzer_schema,
                &report.extra_columns,
                null_marker,
            ))
            .with_context(|| format!("Failed to write row for site {}", record.site.site_id))?;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

/// Generate the full JSON report.
pub fn generate_json_report(report: &BatchReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

pub fn write_detailed_json(path: &Path, report: &BatchReport) -> Result<()> {
    let content = generate_json_report(report)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
