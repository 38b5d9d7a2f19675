//! Data models for the site screener.
//!
//! This module contains the core data structures shared by the reader,
//! orchestrator, aggregator and report emitter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// One parcel/location being screened. Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Unique identifier within one extract.
    pub site_id: String,
    /// Latitude in decimal degrees, within [-90, 90].
    pub latitude: f64,
    /// Longitude in decimal degrees, within [-180, 180].
    pub longitude: f64,
    /// Pass-through columns, keyed by their original header.
    pub attributes: BTreeMap<String, String>,
    /// Zero-based position in the combined input.
    pub position: usize,
    /// Name of the extract the site was read from.
    pub source: String,
}

impl Site {
    /// Returns a trimmed, non-empty attribute value.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Tagged result of one analyzer on one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum AnalysisOutcome {
    Success(Value),
    Error(String),
    Timeout,
}

impl AnalysisOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisOutcome::Success(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            AnalysisOutcome::Success(v) => Some(v),
            _ => None,
        }
    }

    /// Short status label used in tabular exports.
    pub fn status_label(&self) -> &'static str {
        match self {
            AnalysisOutcome::Success(_) => "success",
            AnalysisOutcome::Error(_) => "error",
            AnalysisOutcome::Timeout => "timeout",
        }
    }
}

/// An outcome tagged with the analyzer that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerOutcome {
    /// Registered analyzer name.
    pub analyzer: String,
    /// What the analyzer produced.
    pub outcome: AnalysisOutcome,
    /// Number of attempts made (0 when never started).
    pub attempts: u32,
    /// Wall-clock time spent, in milliseconds.
    pub elapsed_ms: u64,
}

impl AnalyzerOutcome {
    /// Outcome for an analyzer that never got to run before the site deadline.
    pub fn not_started(analyzer: &str) -> Self {
        Self {
            analyzer: analyzer.to_string(),
            outcome: AnalysisOutcome::Timeout,
            attempts: 0,
            elapsed_ms: 0,
        }
    }
}

/// Derived tier label summarizing a site's aggregate suitability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Tier1,
    Tier2,
    Tier3,
    Excluded,
    Undetermined,
}

impl Classification {
    /// Every tier, in report order.
    pub const ALL: [Classification; 5] = [
        Classification::Tier1,
        Classification::Tier2,
        Classification::Tier3,
        Classification::Excluded,
        Classification::Undetermined,
    ];

    /// Stable machine-readable label.
    pub fn slug(&self) -> &'static str {
        match self {
            Classification::Tier1 => "tier_1",
            Classification::Tier2 => "tier_2",
            Classification::Tier3 => "tier_3",
            Classification::Excluded => "excluded",
            Classification::Undetermined => "undetermined",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Tier1 => write!(f, "Tier 1"),
            Classification::Tier2 => write!(f, "Tier 2"),
            Classification::Tier3 => write!(f, "Tier 3"),
            Classification::Excluded => write!(f, "Excluded"),
            Classification::Undetermined => write!(f, "Undetermined"),
        }
    }
}

/// One site plus its analyzer outcomes in registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteAnalysisRecord {
    pub site: Site,
    pub outcomes: Vec<AnalyzerOutcome>,
    pub classification: Classification,
    pub analyzed_at: DateTime<Utc>,
    /// Set when every analyzer failed or a required analyzer failed.
    pub site_failed: bool,
}

impl SiteAnalysisRecord {
    /// Number of successful outcomes.
    pub fn completeness(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_success()).count()
    }

    pub fn outcome(&self, analyzer: &str) -> Option<&AnalysisOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.analyzer == analyzer)
            .map(|o| &o.outcome)
    }
}

/// How the orchestrator reacts to unrecoverable site failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Record failures and keep going.
    #[default]
    Continue,
    /// Abort on the first site-level failure.
    Stop,
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Continue => write!(f, "continue"),
            ErrorPolicy::Stop => write!(f, "stop"),
        }
    }
}

/// Batch lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Aborted,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Aborted)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Pending, BatchStatus::Running)
                | (BatchStatus::Running, BatchStatus::Completed)
                | (BatchStatus::Running, BatchStatus::Aborted)
                | (BatchStatus::Pending, BatchStatus::Aborted)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Pending => write!(f, "PENDING"),
            BatchStatus::Running => write!(f, "RUNNING"),
            BatchStatus::Completed => write!(f, "COMPLETED"),
            BatchStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// State of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub job_id: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub aborted: usize,
    pub status: BatchStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub policy: ErrorPolicy,
    /// Set when not every site was dispatched.
    pub truncated: bool,
    pub cancelled: bool,
}

impl BatchJob {
    pub fn new(total: usize, policy: ErrorPolicy) -> Self {
        Self {
            job_id: format!("batch-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")),
            total,
            completed: 0,
            failed: 0,
            aborted: 0,
            status: BatchStatus::Pending,
            started_at: None,
            finished_at: None,
            policy,
            truncated: false,
            cancelled: false,
        }
    }

    /// Moves to `next` if that is a forward transition. Returns whether it moved.
    pub fn advance(&mut self, next: BatchStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        match next {
            BatchStatus::Running => self.started_at = Some(Utc::now()),
            BatchStatus::Completed | BatchStatus::Aborted => self.finished_at = Some(Utc::now()),
            BatchStatus::Pending => {}
        }
        true
    }

    pub fn succeeded(&self) -> usize {
        self.completed.saturating_sub(self.failed)
    }

    pub fn success_rate(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.succeeded() as f64 / self.completed as f64
        }
    }
}

/// Point-in-time progress of a running batch. Emitted, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
    pub elapsed: Duration,
    pub estimated_remaining: Duration,
    /// Completions per second.
    pub rate: f64,
}

/// Kind of entry in the machine-readable error manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    Schema,
    Analyzer,
    Timeout,
    Aggregation,
    Fatal,
    Skipped,
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ManifestKind::Schema => "schema",
            ManifestKind::Analyzer => "analyzer",
            ManifestKind::Timeout => "timeout",
            ManifestKind::Aggregation => "aggregation",
            ManifestKind::Fatal => "fatal",
            ManifestKind::Skipped => "skipped",
        };
        write!(f, "{}", label)
    }
}

/// One observable failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub kind: ManifestKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    pub message: String,
}

impl ManifestEntry {
    pub fn new(kind: ManifestKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            site_id: None,
            analyzer: None,
            message: message.into(),
        }
    }

    pub fn for_site(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self
    }

    pub fn for_analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.analyzer = Some(analyzer.into());
        self
    }
}

/// Why a duplicate was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateResolution {
    /// The kept record was strictly more complete, or equal and identical in tier.
    Superseded,
    /// Equal completeness but different classifications.
    Conflict,
}

/// A duplicate site record that lost the tie-break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateException {
    pub site_id: String,
    pub kept_position: usize,
    pub kept_source: String,
    pub resolution: DuplicateResolution,
    pub reason: String,
    pub discarded: SiteAnalysisRecord,
}

/// Per-analyzer health counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerHealth {
    pub success: usize,
    pub error: usize,
    pub timeout: usize,
}

/// Summary statistics over the aggregated records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_sites: usize,
    pub by_classification: BTreeMap<Classification, usize>,
    /// Keyed by analyzer name; every registered analyzer is present.
    pub by_analyzer: BTreeMap<String, AnalyzerHealth>,
    pub success_rate: f64,
}

/// Metadata about a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub job_id: String,
    pub generated_at: DateTime<Utc>,
    pub sources: Vec<String>,
    pub policy: ErrorPolicy,
    pub duration_seconds: f64,
}

/// Everything the emitter needs, and the overall batch result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub metadata: ReportMetadata,
    pub job: BatchJob,
    /// True when the batch completed and every site was dispatched.
    pub success: bool,
    pub truncated: bool,
    /// Analyzer names in registration order at batch start.
    pub analyzer_schema: Vec<String>,
    /// Pass-through column names in source order.
    pub extra_columns: Vec<String>,
    pub records: Vec<SiteAnalysisRecord>,
    pub summary: BatchSummary,
    pub manifest: Vec<ManifestEntry>,
    pub duplicates: Vec<DuplicateException>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        let mut job = BatchJob::new(3, ErrorPolicy::Continue);
        assert_eq!(job.status, BatchStatus::Pending);

        assert!(job.advance(BatchStatus::Running));
        assert!(job.started_at.is_some());
        assert!(!job.advance(BatchStatus::Pending));

        assert!(job.advance(BatchStatus::Aborted));
        assert!(!job.advance(BatchStatus::Completed));
        assert!(!job.advance(BatchStatus::Running));
        assert_eq!(job.status, BatchStatus::Aborted);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let json = serde_json::to_value(AnalysisOutcome::Error("boom".into())).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["value"], "boom");

        let json = serde_json::to_value(AnalysisOutcome::Timeout).unwrap();
        assert_eq!(json["status"], "timeout");
    }

    #[test]
    fn test_site_attribute_ignores_blank_values() {
        let mut attributes = BTreeMap::new();
        attributes.insert("zoning".to_string(), "  R-3 ".to_string());
        attributes.insert("flood_zone".to_string(), "   ".to_string());
        let site = Site {
            site_id: "S1".into(),
            latitude: 34.0,
            longitude: -118.0,
            attributes,
            position: 0,
            source: "a.csv".into(),
        };

        assert_eq!(site.attribute("zoning"), Some("R-3"));
        assert_eq!(site.attribute("flood_zone"), None);
        assert_eq!(site.attribute("missing"), None);
    }

    #[test]
    fn test_success_rate() {
        let mut job = BatchJob::new(4, ErrorPolicy::Continue);
        assert_eq!(job.success_rate(), 0.0);
        job.completed = 4;
        job.failed = 1;
        assert_eq!(job.succeeded(), 3);
        assert!((job.success_rate() - 0.75).abs() < f64::EPSILON);
    }
}
