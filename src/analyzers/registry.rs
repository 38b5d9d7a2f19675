//! Analyzer registration and the isolation boundary.
//!
//! `run_isolated` is the only place analyzers are invoked. Whatever an
//! analyzer does (return an error, panic, hang) comes back as an
//! [`AnalyzerOutcome`].

use super::SiteAnalyzer;
use crate::error::AnalyzerError;
use crate::models::{AnalysisOutcome, AnalyzerOutcome, Site};
use serde_json::Value;
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Per-analyzer execution settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSettings {
    /// Classification needs this analyzer to succeed.
    pub scoring_relevant: bool,
    /// Failure of this analyzer fails the whole site.
    pub required: bool,
    /// Budget for all attempts together.
    pub timeout: Duration,
    /// Extra attempts after a transient error.
    pub retries: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            scoring_relevant: true,
            required: false,
            timeout: Duration::from_secs(30),
            retries: 0,
            backoff: Duration::from_millis(250),
        }
    }
}

/// An analyzer together with how it should be run.
#[derive(Clone)]
pub struct RegisteredAnalyzer {
    pub analyzer: Arc<dyn SiteAnalyzer>,
    pub settings: AnalyzerSettings,
}

impl RegisteredAnalyzer {
    pub fn name(&self) -> &'static str {
        self.analyzer.name()
    }
}

impl std::fmt::Debug for RegisteredAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAnalyzer")
            .field("name", &self.name())
            .field("settings", &self.settings)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("analyzer '{0}' is already registered")]
    Duplicate(String),
    #[error("no analyzers are enabled")]
    Empty,
}

/// Ordered set of analyzers. Registration order fixes outcome order and the
/// report column schema.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerRegistry {
    entries: Vec<RegisteredAnalyzer>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        analyzer: Arc<dyn SiteAnalyzer>,
        settings: AnalyzerSettings,
    ) -> Result<(), RegistryError> {
        if self.entries.iter().any(|e| e.name() == analyzer.name()) {
            return Err(RegistryError::Duplicate(analyzer.name().to_string()));
        }
        self.entries.push(RegisteredAnalyzer { analyzer, settings });
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(
        mut self,
        analyzer: Arc<dyn SiteAnalyzer>,
        settings: AnalyzerSettings,
    ) -> Result<Self, RegistryError> {
        self.register(analyzer, settings)?;
        Ok(self)
    }

    pub fn entries(&self) -> &[RegisteredAnalyzer] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Analyzer names in registration order.
    pub fn schema(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn settings(&self, name: &str) -> Option<&AnalyzerSettings> {
        self.entries
            .iter()
            .find(|e| e.name() == name)
            .map(|e| &e.settings)
    }

    /// Required input fields that a source header does not provide.
    pub fn missing_fields(&self, columns: &[String]) -> Vec<(&'static str, &'static str)> {
        let available: HashSet<String> = columns.iter().map(|c| c.trim().to_lowercase()).collect();
        self.entries
            .iter()
            .flat_map(|e| {
                e.analyzer
                    .required_fields()
                    .iter()
                    .filter(|f| !available.contains(**f))
                    .map(move |f| (e.name(), *f))
            })
            .collect()
    }
}

/// Blocking analyzer calls on one site that outlived their budget.
///
/// A blocking thread cannot be interrupted, so a timed-out call keeps running
/// after its outcome is recorded. No further call on the same site may start
/// until every abandoned call has returned.
#[derive(Debug, Default)]
pub struct Stragglers {
    handles: Vec<JoinHandle<Result<Value, AnalyzerError>>>,
}

impl Stragglers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for abandoned calls until `deadline`. Returns whether all of them finished.
    pub async fn settle(&mut self, deadline: Instant) -> bool {
        while let Some(handle) = self.handles.last_mut() {
            let finished = tokio::time::timeout_at(deadline, handle).await.is_ok();
            if !finished {
                return false;
            }
            self.handles.pop();
        }
        true
    }

    fn push(&mut self, handle: JoinHandle<Result<Value, AnalyzerError>>) {
        self.handles.push(handle);
    }
}

/// Run one analyzer on one site without letting anything escape.
///
/// The wait is capped by the analyzer's own budget and by `deadline`, the
/// end of the site's time slice. Transient errors are retried with the
/// analyzer's backoff while budget remains. The call does not start while
/// an earlier call on the same site is still running in `stragglers`.
pub async fn run_isolated(
    entry: &RegisteredAnalyzer,
    site: &Arc<Site>,
    deadline: Instant,
    stragglers: &mut Stragglers,
) -> AnalyzerOutcome {
    let started = Instant::now();
    let settings = &entry.settings;
    let budget_end = deadline.min(started + settings.timeout);
    let mut attempts = 0u32;

    let outcome = loop {
        if !stragglers.settle(budget_end).await {
            debug!(
                "{} on {} not started: {} earlier call(s) still running",
                entry.name(),
                site.site_id,
                stragglers.len()
            );
            break AnalysisOutcome::Timeout;
        }

        let wait = budget_end.saturating_duration_since(Instant::now());
        if wait.is_zero() {
            break AnalysisOutcome::Timeout;
        }

        attempts += 1;
        let analyzer = Arc::clone(&entry.analyzer);
        let input = Arc::clone(site);
        let mut handle = tokio::task::spawn_blocking(move || analyzer.analyze(&input));

        let result = tokio::time::timeout(wait, &mut handle).await;
        match result {
            Err(_) => {
                stragglers.push(handle);
                break AnalysisOutcome::Timeout;
            }
            Ok(Err(join_err)) => {
                let message = if join_err.is_panic() {
                    format!("analyzer panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    "analyzer task was cancelled".to_string()
                };
                warn!("{} on {}: {}", entry.name(), site.site_id, message);
                break AnalysisOutcome::Error(message);
            }
            Ok(Ok(Ok(payload))) => break AnalysisOutcome::Success(payload),
            Ok(Ok(Err(err))) if err.is_transient() && attempts <= settings.retries => {
                debug!(
                    "{} on {} attempt {} failed ({}), retrying",
                    entry.name(),
                    site.site_id,
                    attempts,
                    err
                );
                let remaining = budget_end.saturating_duration_since(Instant::now());
                tokio::time::sleep(settings.backoff.min(remaining)).await;
            }
            Ok(Ok(Err(err))) => break AnalysisOutcome::Error(err.to_string()),
        }
    };

    AnalyzerOutcome {
        analyzer: entry.name().to_string(),
        outcome,
        attempts,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
