//! Result aggregation and statistics.
//!
//! Merges per-site analyzer outcomes into records, derives classifications,
//! resolves duplicate site identities and computes summary statistics.

use super::classify::ClassificationPolicy;
use crate::analyzers::AnalyzerRegistry;
use crate::models::{
    AnalysisOutcome, AnalyzerHealth, AnalyzerOutcome, BatchJob, BatchSummary, Classification,
    DuplicateException, DuplicateResolution, ManifestEntry, ManifestKind, Site,
    SiteAnalysisRecord,
};
use crate::error::AggregationError;
use chrono::Utc;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the aggregator needs to know about each registered analyzer.
#[derive(Debug, Clone)]
struct AnalyzerSlot {
    name: String,
    scoring_relevant: bool,
    required: bool,
}

/// Builds [`SiteAnalysisRecord`]s from raw outcomes.
#[derive(Clone)]
pub struct ResultAggregator {
    slots: Vec<AnalyzerSlot>,
    policy: Arc<dyn ClassificationPolicy>,
}

impl ResultAggregator {
    pub fn new(registry: &AnalyzerRegistry, policy: Arc<dyn ClassificationPolicy>) -> Self {
        let slots = registry
            .entries()
            .iter()
            .map(|e| AnalyzerSlot {
                name: e.name().to_string(),
                scoring_relevant: e.settings.scoring_relevant,
                required: e.settings.required,
            })
            .collect();
        Self { slots, policy }
    }

    /// Merge one site's outcomes into a record.
    ///
    /// Outcomes are re-ordered to registration order; an analyzer with no
    /// outcome at all gets an explicit error so the list length never varies.
    pub fn aggregate(&self, site: Site, outcomes: Vec<AnalyzerOutcome>) -> SiteAnalysisRecord {
        let mut by_name: HashMap<String, AnalyzerOutcome> = outcomes
            .into_iter()
            .map(|o| (o.analyzer.clone(), o))
            .collect();

        let ordered: Vec<AnalyzerOutcome> = self
            .slots
            .iter()
            .map(|slot| {
                by_name.remove(&slot.name).unwrap_or_else(|| AnalyzerOutcome {
                    analyzer: slot.name.clone(),
                    outcome: AnalysisOutcome::Error("no outcome recorded".to_string()),
                    attempts: 0,
                    elapsed_ms: 0,
                })
            })
            .collect();

        if !by_name.is_empty() {
            debug!(
                "Dropping outcomes from unregistered analyzers for {}: {:?}",
                site.site_id,
                by_name.keys().collect::<Vec<_>>()
            );
        }

        let classification = self.classify(&ordered);
        let site_failed = self.is_site_failure(&ordered);

        SiteAnalysisRecord {
            site,
            outcomes: ordered,
            classification,
            analyzed_at: Utc::now(),
            site_failed,
        }
    }

    /// Classification from scoring-relevant outcomes, or `Undetermined` when
    /// any of them is missing or did not succeed.
    pub fn classify(&self, outcomes: &[AnalyzerOutcome]) -> Classification {
        let mut payloads = Vec::new();
        for slot in self.slots.iter().filter(|s| s.scoring_relevant) {
            let payload = outcomes
                .iter()
                .find(|o| o.analyzer == slot.name)
                .and_then(|o| o.outcome.payload());
            match payload {
                Some(p) => payloads.push((slot.name.as_str(), p)),
                None => return Classification::Undetermined,
            }
        }

        if payloads.is_empty() {
            return Classification::Undetermined;
        }
        self.policy.classify(&payloads)
    }

    /// Every analyzer failed, or an analyzer marked required failed.
    pub fn is_site_failure(&self, outcomes: &[AnalyzerOutcome]) -> bool {
        if outcomes.is_empty() {
            return false;
        }
        let all_failed = outcomes.iter().all(|o| !o.outcome.is_success());
        let required_failed = self.slots.iter().filter(|s| s.required).any(|slot| {
            !outcomes
                .iter()
                .any(|o| o.analyzer == slot.name && o.outcome.is_success())
        });
        all_failed || required_failed
    }

    /// Keep one record per `site_id`.
    ///
    /// Tie-break: the record with the most successful outcomes wins; on equal
    /// completeness the earliest source position wins. Losers are returned as
    /// exceptions, marked `Conflict` when completeness ties but the
    /// classifications disagree. Kept records come back in first-appearance
    /// order.
    pub fn deduplicate(
        &self,
        mut records: Vec<SiteAnalysisRecord>,
    ) -> (Vec<SiteAnalysisRecord>, Vec<DuplicateException>) {
        records.sort_by_key(|r| r.site.position);

        let mut groups: Vec<Vec<SiteAnalysisRecord>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for record in records {
            match index.get(&record.site.site_id) {
                Some(&i) => groups[i].push(record),
                None => {
                    index.insert(record.site.site_id.clone(), groups.len());
                    groups.push(vec![record]);
                }
            }
        }

        let mut kept = Vec::with_capacity(groups.len());
        let mut exceptions = Vec::new();

        for mut group in groups {
            if group.len() == 1 {
                kept.extend(group);
                continue;
            }

            let winner_idx = group
                .iter()
                .enumerate()
                .max_by_key(|(_, r)| (r.completeness(), Reverse(r.site.position)))
                .map(|(i, _)| i)
                .unwrap_or(0);
            let winner = group.swap_remove(winner_idx);

            for loser in group {
                let tied = loser.completeness() == winner.completeness();
                let (resolution, reason) = if tied && loser.classification != winner.classification
                {
                    let err = AggregationError {
                        site_id: winner.site.site_id.clone(),
                        kept: winner.site.position,
                        discarded: loser.site.position,
                    };
                    warn!("{}", err);
                    (
                        DuplicateResolution::Conflict,
                        format!(
                            "{}; kept earlier record ({} vs {})",
                            err, winner.classification, loser.classification
                        ),
                    )
                } else if tied {
                    (
                        DuplicateResolution::Superseded,
                        "equal completeness, earlier record kept".to_string(),
                    )
                } else {
                    (
                        DuplicateResolution::Superseded,
                        format!(
                            "less complete ({} vs {} successful analyzers)",
                            loser.completeness(),
                            winner.completeness()
                        ),
                    )
                };

                exceptions.push(DuplicateException {
                    site_id: winner.site.site_id.clone(),
                    kept_position: winner.site.position,
                    kept_source: winner.site.source.clone(),
                    resolution,
                    reason,
                    discarded: loser,
                });
            }
            kept.push(winner);
        }

        (kept, exceptions)
    }
}

/// Manifest entries for analyzer-level failures and duplicate conflicts.
pub fn failure_manifest(
    records: &[SiteAnalysisRecord],
    duplicates: &[DuplicateException],
) -> Vec<ManifestEntry> {
    let mut manifest = Vec::new();

    for record in records {
        for o in &record.outcomes {
            let entry = match &o.outcome {
                AnalysisOutcome::Success(_) => continue,
                AnalysisOutcome::Error(msg) => ManifestEntry::new(ManifestKind::Analyzer, msg.clone()),
                AnalysisOutcome::Timeout if o.attempts == 0 => {
                    ManifestEntry::new(ManifestKind::Timeout, "not started before site deadline")
                }
                AnalysisOutcome::Timeout => ManifestEntry::new(
                    ManifestKind::Timeout,
                    format!("exceeded budget after {} ms", o.elapsed_ms),
                ),
            };
            manifest.push(
                entry
                    .for_site(record.site.site_id.clone())
                    .for_analyzer(o.analyzer.clone()),
            );
        }
    }

    for dup in duplicates {
        if dup.resolution == DuplicateResolution::Conflict {
            manifest.push(
                ManifestEntry::new(ManifestKind::Aggregation, dup.reason.clone())
                    .for_site(dup.site_id.clone()),
            );
        }
    }

    manifest
}

/// Summary statistics. Every tier and every registered analyzer is present
/// even when its count is zero.
pub fn summarize(records: &[SiteAnalysisRecord], schema: &[String], job: &BatchJob) -> BatchSummary {
    let mut by_classification: BTreeMap<Classification, usize> =
        Classification::ALL.iter().map(|c| (*c, 0)).collect();
    let mut by_analyzer: BTreeMap<String, AnalyzerHealth> = schema
        .iter()
        .map(|name| (name.clone(), AnalyzerHealth::default()))
        .collect();

    for record in records {
        *by_classification.entry(record.classification).or_default() += 1;
        for o in &record.outcomes {
            let health = by_analyzer.entry(o.analyzer.clone()).or_default();
            match o.outcome {
                AnalysisOutcome::Success(_) => health.success += 1,
                AnalysisOutcome::Error(_) => health.error += 1,
                AnalysisOutcome::Timeout => health.timeout += 1,
            }
        }
    }

    BatchSummary {
        total_sites: records.len(),
        by_classification,
        by_analyzer,
        success_rate: job.success_rate(),
    }
}

/// Group records by classification, keeping record order within a tier.
pub fn group_by_classification(
    records: &[SiteAnalysisRecord],
) -> BTreeMap<Classification, Vec<&SiteAnalysisRecord>> {
    let mut grouped: BTreeMap<Classification, Vec<&SiteAnalysisRecord>> =
        Classification::ALL.iter().map(|c| (*c, Vec::new())).collect();

    for record in records {
        grouped.entry(record.classification).or_default().push(record);
    }

    grouped
}

/// Sites with the most analyzer failures, worst first.
pub fn most_degraded_sites(records: &[SiteAnalysisRecord], n: usize) -> Vec<(&SiteAnalysisRecord, usize)> {
    let mut degraded: Vec<_> = records
        .iter()
        .map(|r| (r, r.outcomes.len() - r.completeness()))
        .filter(|(_, failures)| *failures > 0)
        .collect();

    degraded.sort_by_key(|(r, failures)| (Reverse(*failures), r.site.position));
    degraded.truncate(n);

    degraded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::TieredPolicy;
    use crate::analyzers::{AnalyzerSettings, SiteAnalyzer};
    use crate::error::AnalyzerError;
    use crate::models::ErrorPolicy;
    use serde_json::{json, Value};

    struct Named(&'static str);

    impl SiteAnalyzer for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        fn required_fields(&self) -> &'static [&'static str] {
            &[]
        }
        fn analyze(&self, _site: &Site) -> Result<Value, AnalyzerError> {
            Ok(json!({}))
        }
    }

    fn registry(specs: &[(&'static str, bool, bool)]) -> AnalyzerRegistry {
        let mut registry = AnalyzerRegistry::new();
        for (name, scoring_relevant, required) in specs {
            registry
                .register(
                    Arc::new(Named(*name)),
                    AnalyzerSettings {
                        scoring_relevant: *scoring_relevant,
                        required: *required,
                        ..AnalyzerSettings::default()
                    },
                )
                .unwrap();
        }
        registry
    }

    fn aggregator(specs: &[(&'static str, bool, bool)]) -> ResultAggregator {
        ResultAggregator::new(&registry(specs), Arc::new(TieredPolicy::default()))
    }

    fn site(id: &str, position: usize) -> Site {
        Site {
            site_id: id.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            attributes: Default::default(),
            position,
            source: format!("extract-{}", position),
        }
    }

    fn ok(name: &str, points: u32) -> AnalyzerOutcome {
        AnalyzerOutcome {
            analyzer: name.to_string(),
            outcome: AnalysisOutcome::Success(json!({ "points": points })),
            attempts: 1,
            elapsed_ms: 1,
        }
    }

    fn failed(name: &str) -> AnalyzerOutcome {
        AnalyzerOutcome {
            analyzer: name.to_string(),
            outcome: AnalysisOutcome::Error("lookup failed".to_string()),
            attempts: 1,
            elapsed_ms: 1,
        }
    }

    #[test]
    fn test_outcomes_follow_registration_order() {
        let agg = aggregator(&[("a", true, false), ("b", true, false), ("c", false, false)]);
        let record = agg.aggregate(site("S1", 0), vec![ok("c", 1), ok("a", 20), ok("b", 10)]);

        let names: Vec<_> = record.outcomes.iter().map(|o| o.analyzer.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(record.classification, Classification::Tier1);
    }

    #[test]
    fn test_missing_outcome_is_filled_and_undetermined() {
        let agg = aggregator(&[("a", true, false), ("b", true, false)]);
        let record = agg.aggregate(site("S1", 0), vec![ok("a", 30)]);

        assert_eq!(record.outcomes.len(), 2);
        assert!(matches!(record.outcomes[1].outcome, AnalysisOutcome::Error(_)));
        assert_eq!(record.classification, Classification::Undetermined);
    }

    #[test]
    fn test_non_scoring_failure_still_classifies() {
        let agg = aggregator(&[("a", true, false), ("env", false, false)]);
        let record = agg.aggregate(site("S1", 0), vec![ok("a", 16), failed("env")]);
        assert_eq!(record.classification, Classification::Tier2);
        assert!(!record.site_failed);
    }

    #[test]
    fn test_site_failure_rules() {
        let agg = aggregator(&[("a", true, false), ("b", true, true)]);
        assert!(agg.is_site_failure(&[failed("a"), failed("b")]));
        assert!(agg.is_site_failure(&[ok("a", 1), failed("b")]));
        assert!(!agg.is_site_failure(&[failed("a"), ok("b", 1)]));
    }

    #[test]
    fn test_dedup_prefers_completeness() {
        let agg = aggregator(&[("a", true, false), ("b", true, false)]);
        let partial = agg.aggregate(site("S1", 0), vec![ok("a", 10), failed("b")]);
        let full = agg.aggregate(site("S1", 3), vec![ok("a", 10), ok("b", 10)]);
        let other = agg.aggregate(site("S2", 1), vec![ok("a", 1), ok("b", 1)]);

        let (kept, exceptions) = agg.deduplicate(vec![full, other, partial]);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].site.site_id, "S1");
        assert_eq!(kept[0].site.position, 3);
        assert_eq!(kept[1].site.site_id, "S2");

        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].discarded.site.position, 0);
        assert_eq!(exceptions[0].resolution, DuplicateResolution::Superseded);
    }

    #[test]
    fn test_dedup_tie_keeps_earliest_and_flags_conflict() {
        let agg = aggregator(&[("a", true, false)]);
        let first = agg.aggregate(site("S1", 0), vec![ok("a", 30)]);
        let second = agg.aggregate(site("S1", 1), vec![ok("a", 1)]);

        let (kept, exceptions) = agg.deduplicate(vec![second, first]);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].site.position, 0);
        assert_eq!(exceptions[0].resolution, DuplicateResolution::Conflict);

        let manifest = failure_manifest(&kept, &exceptions);
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].kind, ManifestKind::Aggregation);
    }

    #[test]
    fn test_summary_lists_every_tier_and_analyzer() {
        let agg = aggregator(&[("a", true, false), ("b", true, false)]);
        let records = vec![agg.aggregate(site("S1", 0), vec![failed("a"), failed("b")])];
        let schema = vec!["a".to_string(), "b".to_string()];
        let job = BatchJob::new(1, ErrorPolicy::Continue);

        let summary = summarize(&records, &schema, &job);

        assert_eq!(summary.by_classification.len(), Classification::ALL.len());
        assert_eq!(summary.by_classification[&Classification::Undetermined], 1);
        assert_eq!(summary.by_analyzer["a"].error, 1);
        assert_eq!(summary.by_analyzer["b"].success, 0);
    }

    #[test]
    fn test_most_degraded_sites() {
        let agg = aggregator(&[("a", true, false), ("b", true, false)]);
        let records = vec![
            agg.aggregate(site("S1", 0), vec![ok("a", 1), failed("b")]),
            agg.aggregate(site("S2", 1), vec![failed("a"), failed("b")]),
            agg.aggregate(site("S3", 2), vec![ok("a", 1), ok("b", 1)]),
        ];

        let worst = most_degraded_sites(&records, 5);
        assert_eq!(worst.len(), 2);
        assert_eq!(worst[0].0.site.site_id, "S2");
        assert_eq!(worst[0].1, 2);
    }
}
