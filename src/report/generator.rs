//! Markdown report generation.
//!
//! Renders a human-readable overview of a batch: metadata, tier counts,
//! analyzer health, the most degraded sites and the error manifest.

use crate::analysis::most_degraded_sites;
use crate::models::{
    BatchJob, BatchReport, BatchSummary, Classification, DuplicateException,
    DuplicateResolution, ManifestEntry, ReportMetadata, SiteAnalysisRecord,
};

/// Rows shown in the manifest table before it is cut off.
const MANIFEST_LIMIT: usize = 50;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &BatchReport) -> String {
    let mut output = String::new();

    output.push_str("# Site Screening Report\n\n");

    output.push_str(&generate_metadata_section(&report.metadata, &report.job));
    output.push_str(&generate_status_section(report));
    output.push_str(&generate_summary_section(&report.summary));
    output.push_str(&generate_degraded_section(&report.records));
    output.push_str(&generate_duplicates_section(&report.duplicates));
    output.push_str(&generate_manifest_section(&report.manifest));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &ReportMetadata, job: &BatchJob) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Job:** `{}`\n", metadata.job_id));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if !metadata.sources.is_empty() {
        section.push_str(&format!("- **Sources:** {}\n", metadata.sources.join(", ")));
    }
    section.push_str(&format!("- **Error Policy:** {}\n", metadata.policy));
    section.push_str(&format!("- **Sites:** {}\n", job.total));
    section.push_str(&format!("- **Duration:** {:.1}s\n", metadata.duration_seconds));
    section.push('\n');

    section
}

fn generate_status_section(report: &BatchReport) -> String {
    let job = &report.job;
    let mut section = String::new();

    section.push_str("## Batch Status\n\n");
    section.push_str(&format!("**{}**", job.status));
    if job.cancelled {
        section.push_str(" (cancelled)");
    } else if report.truncated {
        section.push_str(" (truncated)");
    }
    section.push_str("\n\n");

    section.push_str("| Completed | Succeeded | Failed | Not Dispatched | Success Rate |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {:.1}% |\n\n",
        job.completed,
        job.succeeded(),
        job.failed,
        job.aborted,
        job.success_rate() * 100.0
    ));

    section
}

fn generate_summary_section(summary: &BatchSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");

    section.push_str("### Classification Breakdown\n\n");
    section.push_str("| Tier | Sites |\n");
    section.push_str("|:---|:---:|\n");
    for tier in Classification::ALL {
        let count = summary.by_classification.get(&tier).copied().unwrap_or(0);
        section.push_str(&format!("| {} | {} |\n", tier, count));
    }
    section.push_str(&format!("| **Total** | **{}** |\n\n", summary.total_sites));

    if !summary.by_analyzer.is_empty() {
        section.push_str("### Analyzer Health\n\n");
        section.push_str("| Analyzer | Success | Error | Timeout |\n");
        section.push_str("|:---|:---:|:---:|:---:|\n");
        for (name, health) in &summary.by_analyzer {
            section.push_str(&format!(
                "| `{}` | {} | {} | {} |\n",
                name, health.success, health.error, health.timeout
            ));
        }
        section.push('\n');
    }

    section
}

fn generate_degraded_section(records: &[SiteAnalysisRecord]) -> String {
    let degraded = most_degraded_sites(records, 10);
    if degraded.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("### Most Degraded Sites\n\n");
    section.push_str("| Site | Source | Failed Analyzers | Classification |\n");
    section.push_str("|:---|:---|:---:|:---|\n");
    for (record, failures) in degraded {
        section.push_str(&format!(
            "| `{}` | {} | {} | {} |\n",
            record.site.site_id, record.site.source, failures, record.classification
        ));
    }
    section.push('\n');

    section
}

fn generate_duplicates_section(duplicates: &[DuplicateException]) -> String {
    if duplicates.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Duplicate Sites\n\n");
    section.push_str("| Site | Kept | Discarded | Resolution | Reason |\n");
    section.push_str("|:---|:---|:---|:---|:---|\n");
    for dup in duplicates {
        let resolution = match dup.resolution {
            DuplicateResolution::Superseded => "superseded",
            DuplicateResolution::Conflict => "**conflict**",
        };
        section.push_str(&format!(
            "| `{}` | {} #{} | {} #{} | {} | {} |\n",
            dup.site_id,
            dup.kept_source,
            dup.kept_position,
            dup.discarded.site.source,
            dup.discarded.site.position,
            resolution,
            escape_cell(&dup.reason)
        ));
    }
    section.push('\n');

    section
}

fn generate_manifest_section(manifest: &[ManifestEntry]) -> String {
    let mut section = String::new();

    section.push_str("## Error Manifest\n\n");

    if manifest.is_empty() {
        section.push_str("No failures were recorded.\n\n");
        return section;
    }

    section.push_str("| Kind | Site | Analyzer | Message |\n");
    section.push_str("|:---|:---|:---|:---|\n");
    for entry in manifest.iter().take(MANIFEST_LIMIT) {
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            entry.kind,
            entry.site_id.as_deref().unwrap_or("-"),
            entry.analyzer.as_deref().unwrap_or("-"),
            escape_cell(&entry.message)
        ));
    }
    if manifest.len() > MANIFEST_LIMIT {
        section.push_str(&format!(
            "\n*{} more entries in `detailed.json`.*\n",
            manifest.len() - MANIFEST_LIMIT
        ));
    }
    section.push('\n');

    section
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by sitescreen v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AnalysisOutcome, AnalyzerHealth, AnalyzerOutcome, BatchStatus, ErrorPolicy, ManifestKind,
        Site,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn create_test_report() -> BatchReport {
        let mut job = BatchJob::new(2, ErrorPolicy::Stop);
        job.advance(BatchStatus::Running);
        job.completed = 1;
        job.failed = 1;
        job.aborted = 1;
        job.advance(BatchStatus::Aborted);
        job.truncated = true;

        let record = SiteAnalysisRecord {
            site: Site {
                site_id: "S1".to_string(),
                latitude: 33.9,
                longitude: -118.2,
                attributes: BTreeMap::new(),
                position: 0,
                source: "la.csv".to_string(),
            },
            outcomes: vec![AnalyzerOutcome {
                analyzer: "land_use".to_string(),
                outcome: AnalysisOutcome::Error("unknown zoning | code".to_string()),
                attempts: 1,
                elapsed_ms: 4,
            }],
            classification: Classification::Undetermined,
            analyzed_at: Utc::now(),
            site_failed: true,
        };

        let mut by_classification: BTreeMap<Classification, usize> =
            Classification::ALL.iter().map(|c| (*c, 0)).collect();
        by_classification.insert(Classification::Undetermined, 1);

        BatchReport {
            metadata: ReportMetadata {
                job_id: job.job_id.clone(),
                generated_at: Utc::now(),
                sources: vec!["la.csv".to_string()],
                policy: ErrorPolicy::Stop,
                duration_seconds: 2.5,
            },
            job,
            success: false,
            truncated: true,
            analyzer_schema: vec!["land_use".to_string()],
            extra_columns: vec![],
            records: vec![record],
            summary: BatchSummary {
                total_sites: 1,
                by_classification,
                by_analyzer: [("land_use".to_string(), AnalyzerHealth { success: 0, error: 1, timeout: 0 })]
                    .into_iter()
                    .collect(),
                success_rate: 0.0,
            },
            manifest: vec![
                ManifestEntry::new(ManifestKind::Analyzer, "unknown zoning | code")
                    .for_site("S1")
                    .for_analyzer("land_use"),
                ManifestEntry::new(ManifestKind::Skipped, "batch stopped after a site failure")
                    .for_site("S2"),
            ],
            duplicates: vec![],
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let markdown = generate_markdown_report(&create_test_report());

        assert!(markdown.contains("# Site Screening Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("**ABORTED** (truncated)"));
        assert!(markdown.contains("| Undetermined | 1 |"));
        assert!(markdown.contains("| `land_use` | 0 | 1 | 0 |"));
        assert!(markdown.contains("### Most Degraded Sites"));
        assert!(markdown.contains("unknown zoning \\| code"));
        assert!(!markdown.contains("## Duplicate Sites"));
    }

    #[test]
    fn test_empty_manifest_message() {
        let section = generate_manifest_section(&[]);
        assert!(section.contains("No failures were recorded."));
    }

    #[test]
    fn test_manifest_is_capped() {
        let manifest: Vec<_> = (0..MANIFEST_LIMIT + 3)
            .map(|i| ManifestEntry::new(ManifestKind::Timeout, format!("slow {}", i)))
            .collect();
        let section = generate_manifest_section(&manifest);
        assert!(section.contains("*3 more entries in `detailed.json`.*"));
        assert!(!section.contains(&format!("slow {}", MANIFEST_LIMIT)));
    }
}
