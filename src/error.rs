//! Error taxonomy for the screening engine.
//!
//! Only [`FatalOrchestrationError`] is allowed to end a batch early on its
//! own. Everything else is recovered at the narrowest scope: schema problems
//! per row (lenient) or per load (strict), analyzer problems per outcome,
//! duplicate conflicts per site.

use std::fmt;
use thiserror::Error;

/// A single rejected input row.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RowProblem {
    /// 1-indexed data row number (header excluded).
    pub row: usize,
    /// Identifier of the row, when one could be read.
    pub site_id: Option<String>,
    /// Human readable reason.
    pub reason: String,
}

impl fmt::Display for RowProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.site_id {
            Some(id) => write!(f, "row {} ({}): {}", self.row, id, self.reason),
            None => write!(f, "row {}: {}", self.row, self.reason),
        }
    }
}

/// Problems with the shape or content of a site source.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("source is missing required column '{0}'")]
    MissingColumn(String),

    #[error("{} invalid row(s) in source: {}", .0.len(), join_problems(.0))]
    InvalidRows(Vec<RowProblem>),

    #[error("failed to read source: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to open source: {0}")]
    Io(#[from] std::io::Error),
}

fn join_problems(problems: &[RowProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure inside a single analyzer. Never escapes the analyzer boundary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalyzerError {
    #[error("required field '{0}' is missing")]
    MissingField(String),

    #[error("field '{field}' has unusable value '{value}'")]
    InvalidField { field: String, value: String },

    /// The reference lookup could not answer. Distinct from a negative answer.
    #[error("reference lookup unavailable: {0}")]
    LookupUnavailable(String),

    #[error("{0}")]
    Failed(String),
}

impl AnalyzerError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalyzerError::LookupUnavailable(_))
    }
}

/// A duplicate site that could not be resolved without losing information.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("site '{site_id}' has conflicting duplicates at positions {kept} and {discarded}")]
pub struct AggregationError {
    pub site_id: String,
    pub kept: usize,
    pub discarded: usize,
}

/// The only error class that aborts a batch regardless of policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FatalOrchestrationError {
    #[error("cannot create worker pool: {0}")]
    PoolCreation(String),

    #[error("worker pool closed while dispatching site '{0}'")]
    PoolClosed(String),

    #[error("dispatch of site '{site_id}' rejected: {reason}")]
    DispatchRejected { site_id: String, reason: String },

    #[error("worker for site '{site_id}' crashed: {reason}")]
    WorkerCrashed { site_id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_rows_lists_every_row() {
        let err = SchemaError::InvalidRows(vec![
            RowProblem {
                row: 2,
                site_id: Some("S2".to_string()),
                reason: "latitude out of range".to_string(),
            },
            RowProblem {
                row: 5,
                site_id: None,
                reason: "empty site_id".to_string(),
            },
        ]);

        let msg = err.to_string();
        assert!(msg.starts_with("2 invalid row(s)"));
        assert!(msg.contains("row 2 (S2): latitude out of range"));
        assert!(msg.contains("row 5: empty site_id"));
    }

    #[test]
    fn test_only_lookup_unavailable_is_transient() {
        assert!(AnalyzerError::LookupUnavailable("down".into()).is_transient());
        assert!(!AnalyzerError::MissingField("zoning".into()).is_transient());
        assert!(!AnalyzerError::Failed("boom".into()).is_transient());
    }
}
