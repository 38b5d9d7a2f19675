//! Report assembly and emission.

pub mod export;
pub mod generator;

pub use generator::generate_markdown_report;

use crate::analysis::{group_by_classification, summarize};
use crate::error::RowProblem;
use crate::models::{
    BatchReport, BatchStatus, ManifestEntry, ManifestKind, ReportMetadata,
};
use crate::orchestrator::BatchOutcome;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Output artifacts a run can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// `summary.csv`, one flat row per site.
    Summary,
    /// `detailed.json` with nested payloads.
    Detailed,
    /// `partitioned/<tier>.csv`.
    Partitioned,
    /// `report.md` overview.
    Markdown,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 4] = [
        ReportFormat::Summary,
        ReportFormat::Detailed,
        ReportFormat::Partitioned,
        ReportFormat::Markdown,
    ];
}

/// Inputs to the report that do not come out of the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct SourceInfo {
    pub sources: Vec<String>,
    pub extra_columns: Vec<String>,
    /// Rows skipped by a lenient reader.
    pub warnings: Vec<RowProblem>,
}

/// Combine a finished batch with its source information.
pub fn assemble(outcome: BatchOutcome, source: SourceInfo, duration_seconds: f64) -> BatchReport {
    let summary = summarize(&outcome.records, &outcome.schema, &outcome.job);

    let mut manifest: Vec<ManifestEntry> = source
        .warnings
        .iter()
        .map(|w| {
            let entry = ManifestEntry::new(ManifestKind::Schema, w.to_string());
            match &w.site_id {
                Some(id) => entry.for_site(id.clone()),
                None => entry,
            }
        })
        .collect();
    manifest.extend(outcome.manifest);

    let job = outcome.job;
    let truncated = job.truncated;
    let success = job.status == BatchStatus::Completed && !truncated && outcome.fatal.is_none();

    BatchReport {
        metadata: ReportMetadata {
            job_id: job.job_id.clone(),
            generated_at: Utc::now(),
            sources: source.sources,
            policy: job.policy,
            duration_seconds,
        },
        job,
        success,
        truncated,
        analyzer_schema: outcome.schema,
        extra_columns: source.extra_columns,
        records: outcome.records,
        summary,
        manifest,
        duplicates: outcome.duplicates,
    }
}

/// Writes report artifacts into an output directory.
#[derive(Debug, Clone)]
pub struct ReportEmitter {
    null_marker: String,
}

impl Default for ReportEmitter {
    fn default() -> Self {
        Self::new("NA")
    }
}

impl ReportEmitter {
    pub fn new(null_marker: impl Into<String>) -> Self {
        Self {
            null_marker: null_marker.into(),
        }
    }

    /// Write the requested formats and return every file written.
    pub fn emit(
        &self,
        report: &BatchReport,
        formats: &[ReportFormat],
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

        let mut written = Vec::new();

        for format in formats {
            match format {
                ReportFormat::Summary => {
                    let path = out_dir.join("summary.csv");
                    export::write_summary_csv(&path, report.records.iter(), report, &self.null_marker)?;
                    written.push(path);
                }
                ReportFormat::Detailed => {
                    let path = out_dir.join("detailed.json");
                    export::write_detailed_json(&path, report)?;
                    written.push(path);
                }
                ReportFormat::Partitioned => {
                    written.extend(self.emit_partitioned(report, &out_dir.join("partitioned"))?);
                }
                ReportFormat::Markdown => {
                    let path = out_dir.join("report.md");
                    fs::write(&path, generate_markdown_report(report))
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    written.push(path);
                }
            }
            debug!("Emitted {:?} report", format);
        }

        info!("Wrote {} report files to {}", written.len(), out_dir.display());
        Ok(written)
    }

    /// One CSV per tier, written even when the tier is empty.
    fn emit_partitioned(&self, report: &BatchReport, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut written = Vec::new();
        for (tier, records) in group_by_classification(&report.records) {
            let path = dir.join(format!("{}.csv", tier.slug()));
            export::write_summary_csv(&path, records.into_iter(), report, &self.null_marker)?;
            written.push(path);
        }
        Ok(written)
    }
}
