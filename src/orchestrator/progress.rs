//! Job bookkeeping and progress reporting.
//!
//! [`JobTracker`] is the single synchronization point for a running batch:
//! counters, status transitions and progress snapshots all go through its
//! lock, so concurrent completions can never lose an update and snapshots
//! are delivered in `completed` order.

use crate::models::{BatchJob, BatchStatus, ErrorPolicy, ProgressSnapshot};
use indicatif::{ProgressBar, ProgressStyle};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Receives a snapshot after every completed site. May be called from any
/// worker; implementations handle their own thread-safety.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self(snapshot)
    }
}

/// Terminal progress bar.
pub struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} sites {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for ProgressBarSink {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.bar.set_position(snapshot.completed as u64);
        self.bar.set_message(format!(
            "({:.1}/s, ~{}s left)",
            snapshot.rate,
            snapshot.estimated_remaining.as_secs()
        ));
    }
}

/// Exponential moving average over inter-completion intervals.
#[derive(Debug, Clone)]
pub struct EtaEstimator {
    alpha: f64,
    avg_interval: Option<f64>,
    last: Option<Instant>,
}

impl EtaEstimator {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            avg_interval: None,
            last: None,
        }
    }

    /// Record a completion at `now`. The first interval is measured from `started`.
    pub fn observe(&mut self, now: Instant, started: Instant) {
        let since = self.last.unwrap_or(started);
        let dt = now.saturating_duration_since(since).as_secs_f64();
        self.avg_interval = Some(match self.avg_interval {
            None => dt,
            Some(avg) => self.alpha * dt + (1.0 - self.alpha) * avg,
        });
        self.last = Some(now);
    }

    /// Completions per second.
    pub fn rate(&self) -> f64 {
        match self.avg_interval {
            Some(avg) if avg > 0.0 => 1.0 / avg,
            _ => 0.0,
        }
    }

    pub fn estimate(&self, remaining: usize) -> Duration {
        if remaining == 0 {
            return Duration::ZERO;
        }
        match self.avg_interval {
            Some(avg) => Duration::from_secs_f64((avg * remaining as f64).max(0.0)),
            None => Duration::ZERO,
        }
    }
}

struct TrackerState {
    job: BatchJob,
    eta: EtaEstimator,
}

/// Shared state of one running batch.
pub struct JobTracker {
    state: Mutex<TrackerState>,
    stopping: AtomicBool,
    sink: Option<Arc<dyn ProgressSink>>,
    started: Instant,
}

impl JobTracker {
    pub fn new(total: usize, policy: ErrorPolicy, sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                job: BatchJob::new(total, policy),
                eta: EtaEstimator::new(0.3),
            }),
            stopping: AtomicBool::new(false),
            sink,
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(&self) {
        let mut state = self.lock();
        state.job.advance(BatchStatus::Running);
        info!(
            "Batch {} running: {} sites, policy {}",
            state.job.job_id, state.job.total, state.job.policy
        );
    }

    /// Whether dispatching should stop.
    pub fn should_stop(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Flip the job to aborted and stop further dispatch.
    pub fn abort(&self, reason: &str) {
        self.stopping.store(true, Ordering::SeqCst);
        let mut state = self.lock();
        if state.job.advance(BatchStatus::Aborted) {
            warn!("Batch {} aborted: {}", state.job.job_id, reason);
        }
    }

    /// Count one finished site and publish a snapshot.
    pub fn record_completion(&self, site_id: &str, site_failed: bool) {
        let mut state = self.lock();
        state.job.completed += 1;
        if site_failed {
            state.job.failed += 1;
        }

        let now = Instant::now();
        state.eta.observe(now, self.started);

        if site_failed && state.job.policy == ErrorPolicy::Stop {
            self.stopping.store(true, Ordering::SeqCst);
            if state.job.advance(BatchStatus::Aborted) {
                warn!(
                    "Batch {} aborted: site {} failed under stop policy",
                    state.job.job_id, site_id
                );
            }
        }

        if let Some(sink) = &self.sink {
            let snapshot = snapshot_of(&state, now.duration_since(self.started));
            // A broken sink must not lose the site's records.
            let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| sink.on_progress(&snapshot)));
            if delivered.is_err() {
                warn!("Progress sink panicked at {}/{} sites", snapshot.completed, snapshot.total);
            }
        }
    }

    /// Mark sites that will never be dispatched.
    pub fn record_skipped(&self, count: usize) {
        self.lock().job.aborted += count;
    }

    /// Close the job and hand it back.
    pub fn finish(&self, cancelled: bool) -> BatchJob {
        let mut state = self.lock();
        state.job.advance(BatchStatus::Completed);
        state.job.cancelled = cancelled;
        state.job.truncated =
            state.job.status == BatchStatus::Aborted || state.job.aborted > 0 || cancelled;
        state.job.finished_at = Some(chrono::Utc::now());
        info!(
            "Batch {} {}: {}/{} completed, {} failed, {} not dispatched",
            state.job.job_id,
            state.job.status,
            state.job.completed,
            state.job.total,
            state.job.failed,
            state.job.aborted
        );
        state.job.clone()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        snapshot_of(&state, self.started.elapsed())
    }
}

fn snapshot_of(state: &TrackerState, elapsed: Duration) -> ProgressSnapshot {
    let job = &state.job;
    let percentage = if job.total == 0 {
        100.0
    } else {
        job.completed as f64 / job.total as f64 * 100.0
    };
    ProgressSnapshot {
        completed: job.completed,
        total: job.total,
        percentage,
        elapsed,
        estimated_remaining: state.eta.estimate(job.total.saturating_sub(job.completed)),
        rate: state.eta.rate(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eta_converges_to_zero() {
        let start = Instant::now();
        let mut eta = EtaEstimator::new(0.3);
        assert_eq!(eta.estimate(5), Duration::ZERO);

        eta.observe(start + Duration::from_secs(2), start);
        assert_eq!(eta.estimate(3), Duration::from_secs(6));
        assert!((eta.rate() - 0.5).abs() < 1e-9);

        eta.observe(start + Duration::from_secs(3), start);
        // 0.3 * 1 + 0.7 * 2 = 1.7s per site
        assert!((eta.estimate(2).as_secs_f64() - 3.4).abs() < 1e-6);
        assert_eq!(eta.estimate(0), Duration::ZERO);
    }

    #[test]
    fn test_stop_policy_aborts_on_site_failure() {
        let tracker = JobTracker::new(3, ErrorPolicy::Stop, None);
        tracker.start();
        tracker.record_completion("S1", false);
        assert!(!tracker.should_stop());

        tracker.record_completion("S2", true);
        assert!(tracker.should_stop());

        tracker.record_completion("S3", false);
        let job = tracker.finish(false);
        assert_eq!(job.status, BatchStatus::Aborted);
        assert!(job.truncated);
        assert_eq!(job.completed, 3);
        assert_eq!(job.failed, 1);
    }

    #[test]
    fn test_continue_policy_completes_with_failures() {
        let tracker = JobTracker::new(2, ErrorPolicy::Continue, None);
        tracker.start();
        tracker.record_completion("S1", true);
        tracker.record_completion("S2", true);
        assert!(!tracker.should_stop());

        let job = tracker.finish(false);
        assert_eq!(job.status, BatchStatus::Completed);
        assert!(!job.truncated);
        assert_eq!(job.failed, 2);
    }

    #[test]
    fn test_snapshots_reach_total() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = move |s: &ProgressSnapshot| {
            sink_seen.lock().unwrap().push((s.completed, s.estimated_remaining));
        };

        let tracker = JobTracker::new(2, ErrorPolicy::Continue, Some(Arc::new(sink)));
        tracker.start();
        tracker.record_completion("S1", false);
        tracker.record_completion("S2", false);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], (2, Duration::ZERO));
        assert_eq!(tracker.snapshot().percentage, 100.0);
    }

    #[test]
    fn test_panicking_sink_keeps_counting() {
        let sink = |s: &ProgressSnapshot| {
            if s.completed == 1 {
                panic!("display went away");
            }
        };

        let tracker = JobTracker::new(2, ErrorPolicy::Continue, Some(Arc::new(sink)));
        tracker.start();
        tracker.record_completion("S1", false);
        tracker.record_completion("S2", true);

        let job = tracker.finish(false);
        assert_eq!(job.status, BatchStatus::Completed);
        assert_eq!(job.completed, 2);
        assert_eq!(job.failed, 1);
    }
}
