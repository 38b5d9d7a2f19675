//! Batch orchestration.
//!
//! Sites are dispatched in input order to a bounded pool of tokio workers.
//! Each worker runs every registered analyzer for its site, in registration
//! order, through the isolation boundary, and reports completion to the
//! [`JobTracker`]. Records are put back into input order before they leave
//! this module, whatever order the workers finished in.

pub mod progress;

pub use progress::{JobTracker, ProgressBarSink, ProgressSink};

use crate::analysis::{failure_manifest, ClassificationPolicy, ResultAggregator};
use crate::analyzers::{run_isolated, AnalyzerRegistry, Stragglers};
use crate::error::FatalOrchestrationError;
use crate::models::{
    BatchJob, DuplicateException, ErrorPolicy, ManifestEntry, ManifestKind, Site,
    SiteAnalysisRecord,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Cooperative cancellation. Once cancelled, no new site is dispatched;
/// sites already running finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Admission control consulted right before each site is dispatched.
/// A rejection is fatal for the batch.
pub trait DispatchGuard: Send + Sync {
    /// `index` is the zero-based dispatch position.
    fn admit(&self, site: &Site, index: usize) -> Result<(), FatalOrchestrationError>;
}

/// Refuses to dispatch more than `max` sites.
#[derive(Debug, Clone)]
pub struct SiteQuota {
    pub max: usize,
}

impl DispatchGuard for SiteQuota {
    fn admit(&self, site: &Site, index: usize) -> Result<(), FatalOrchestrationError> {
        if index >= self.max {
            return Err(FatalOrchestrationError::DispatchRejected {
                site_id: site.site_id.clone(),
                reason: format!("site quota of {} exhausted", self.max),
            });
        }
        Ok(())
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Worker pool size.
    pub concurrency: usize,
    /// Time slice for all analyzers of one site.
    pub site_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            site_timeout: Duration::from_secs(120),
        }
    }
}

/// Everything a finished batch produced.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub job: BatchJob,
    /// One record per distinct site, in input order.
    pub records: Vec<SiteAnalysisRecord>,
    pub duplicates: Vec<DuplicateException>,
    pub manifest: Vec<ManifestEntry>,
    /// Analyzer names at batch start.
    pub schema: Vec<String>,
    pub fatal: Option<FatalOrchestrationError>,
}

/// All occurrences of one `site_id`. The unit of dispatch, so the same id is
/// never in two workers at once.
struct SiteUnit {
    site_id: String,
    occurrences: Vec<Arc<Site>>,
}

fn group_units(sites: Vec<Site>) -> VecDeque<SiteUnit> {
    let mut units: Vec<SiteUnit> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for site in sites {
        match index.get(&site.site_id) {
            Some(&i) => units[i].occurrences.push(Arc::new(site)),
            None => {
                index.insert(site.site_id.clone(), units.len());
                units.push(SiteUnit {
                    site_id: site.site_id.clone(),
                    occurrences: vec![Arc::new(site)],
                });
            }
        }
    }

    units.into()
}

/// Dispatches batches of sites to analyzers.
pub struct BatchOrchestrator {
    options: OrchestratorOptions,
    policy: Arc<dyn ClassificationPolicy>,
    progress: Option<Arc<dyn ProgressSink>>,
    guard: Option<Arc<dyn DispatchGuard>>,
    cancel: CancelToken,
}

impl BatchOrchestrator {
    pub fn new(options: OrchestratorOptions, policy: Arc<dyn ClassificationPolicy>) -> Self {
        Self {
            options,
            policy,
            progress: None,
            guard: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_guard(mut self, guard: Arc<dyn DispatchGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels batches run by this orchestrator.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every site through every registered analyzer.
    ///
    /// Never returns early on analyzer or site failures; those are in the
    /// records and the manifest. A fatal orchestration error ends dispatch
    /// immediately and is reported in [`BatchOutcome::fatal`].
    pub async fn submit_batch(
        &self,
        sites: Vec<Site>,
        registry: &AnalyzerRegistry,
        policy: ErrorPolicy,
    ) -> BatchOutcome {
        let schema = registry.schema();
        let registry = Arc::new(registry.clone());
        let aggregator = Arc::new(ResultAggregator::new(&registry, Arc::clone(&self.policy)));

        let mut pending = group_units(sites);
        let tracker = Arc::new(JobTracker::new(pending.len(), policy, self.progress.clone()));
        let mut manifest = Vec::new();
        let mut fatal = None;

        if self.options.concurrency == 0 {
            fatal = Some(FatalOrchestrationError::PoolCreation(
                "concurrency must be at least 1".to_string(),
            ));
        } else {
            tracker.start();
        }

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let mut handles = Vec::new();
        let mut dispatched = 0usize;
        let mut cancelled = false;

        while fatal.is_none() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if tracker.should_stop() {
                break;
            }
            let Some(unit) = pending.pop_front() else {
                break;
            };

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let err = FatalOrchestrationError::PoolClosed(unit.site_id.clone());
                    pending.push_front(unit);
                    fatal = Some(err);
                    break;
                }
            };

            // Waiting for a worker can take a while; re-check before dispatch.
            if self.cancel.is_cancelled() || tracker.should_stop() {
                cancelled = self.cancel.is_cancelled();
                pending.push_front(unit);
                break;
            }

            if let Some(guard) = &self.guard {
                if let Err(err) = guard.admit(&unit.occurrences[0], dispatched) {
                    pending.push_front(unit);
                    fatal = Some(err);
                    break;
                }
            }

            debug!("Dispatching site {} ({})", unit.site_id, dispatched + 1);
            dispatched += 1;

            let registry = Arc::clone(&registry);
            let aggregator = Arc::clone(&aggregator);
            let tracker = Arc::clone(&tracker);
            let site_timeout = self.options.site_timeout;
            let site_id = unit.site_id.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let records = run_unit(&unit, &registry, &aggregator, site_timeout).await;
                let failed = records.iter().all(|r| r.site_failed);
                if failed {
                    warn!("Site {} failed every required analysis", unit.site_id);
                }
                tracker.record_completion(&unit.site_id, failed);
                records
            });
            handles.push((site_id, handle));
        }

        if let Some(err) = &fatal {
            error!("{}", err);
            tracker.abort(&err.to_string());
            manifest.push(ManifestEntry::new(ManifestKind::Fatal, err.to_string()));
        }

        if !pending.is_empty() {
            info!("{} sites were not dispatched", pending.len());
            tracker.record_skipped(pending.len());
            for unit in &pending {
                let reason = if cancelled {
                    "batch cancelled before dispatch"
                } else if fatal.is_some() {
                    "batch aborted by fatal error before dispatch"
                } else {
                    "batch stopped after a site failure"
                };
                manifest.push(ManifestEntry::new(ManifestKind::Skipped, reason).for_site(unit.site_id.clone()));
            }
        }

        let mut records = Vec::new();
        let (ids, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        for (site_id, joined) in ids.into_iter().zip(futures::future::join_all(handles).await) {
            match joined {
                Ok(unit_records) => records.extend(unit_records),
                Err(join_err) => {
                    let err = FatalOrchestrationError::WorkerCrashed {
                        site_id,
                        reason: join_err.to_string(),
                    };
                    error!("{}", err);
                    tracker.abort(&err.to_string());
                    manifest.push(ManifestEntry::new(ManifestKind::Fatal, err.to_string()));
                    fatal.get_or_insert(err);
                }
            }
        }

        let job = tracker.finish(cancelled);
        let (records, duplicates) = aggregator.deduplicate(records);
        manifest.extend(failure_manifest(&records, &duplicates));

        BatchOutcome {
            job,
            records,
            duplicates,
            manifest,
            schema,
            fatal,
        }
    }
}

/// Analyze every occurrence of one site, one after another.
///
/// Calls abandoned on timeout keep running; no later call for the same site
/// starts until they return.
async fn run_unit(
    unit: &SiteUnit,
    registry: &AnalyzerRegistry,
    aggregator: &ResultAggregator,
    site_timeout: Duration,
) -> Vec<SiteAnalysisRecord> {
    let mut records = Vec::with_capacity(unit.occurrences.len());
    let mut stragglers = Stragglers::new();

    for site in &unit.occurrences {
        let deadline = Instant::now() + site_timeout;
        let mut outcomes = Vec::with_capacity(registry.len());
        for entry in registry.entries() {
            outcomes.push(run_isolated(entry, site, deadline, &mut stragglers).await);
        }
        records.push(aggregator.aggregate(site.as_ref().clone(), outcomes));
    }

    records
}
