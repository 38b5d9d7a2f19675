//! Site analyzers.
//!
//! Each analyzer evaluates one regulatory or geospatial dimension of a site.
//! They are registered into an [`AnalyzerRegistry`], which fixes the order
//! of outcomes and report columns, and are only ever invoked through
//! [`run_isolated`].

pub mod federal;
pub mod hazard;
pub mod land_use;
pub mod lookup;
pub mod registry;
pub mod scoring;
pub mod transit;

pub use federal::FederalStatusAnalyzer;
pub use hazard::{EnvironmentalScreeningAnalyzer, FloodRiskAnalyzer};
pub use land_use::LandUseAnalyzer;
pub use lookup::{AttributeLookup, LookupRecord, ReferenceLookup};
pub use registry::{
    run_isolated, AnalyzerRegistry, AnalyzerSettings, RegisteredAnalyzer, RegistryError, Stragglers,
};
pub use scoring::StateScoringAnalyzer;
pub use transit::TransitAnalyzer;

use crate::config::{AnalyzerConfig, AnalyzersConfig};
use crate::error::AnalyzerError;
use crate::models::Site;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Evaluates one dimension for one site.
///
/// Implementations must be pure: no mutation of the site, and no inputs
/// beyond the site and read-only reference data. Returning `Err` is the
/// normal way to fail; the registry turns it into an error outcome.
pub trait SiteAnalyzer: Send + Sync {
    /// Stable identifier, used as the report column prefix.
    fn name(&self) -> &'static str;

    /// Input fields the analyzer reads.
    fn required_fields(&self) -> &'static [&'static str];

    fn analyze(&self, site: &Site) -> Result<Value, AnalyzerError>;
}

/// Build the registry for the built-in analyzers, in canonical order.
pub fn build_registry(
    config: &AnalyzersConfig,
    lookup: Arc<dyn ReferenceLookup>,
) -> Result<AnalyzerRegistry, RegistryError> {
    let candidates: Vec<(Arc<dyn SiteAnalyzer>, &AnalyzerConfig, bool)> = vec![
        (
            Arc::new(FederalStatusAnalyzer::new(Arc::clone(&lookup))) as Arc<dyn SiteAnalyzer>,
            &config.federal_status,
            true,
        ),
        (
            Arc::new(StateScoringAnalyzer::new(Arc::clone(&lookup))) as Arc<dyn SiteAnalyzer>,
            &config.state_scoring,
            true,
        ),
        (
            Arc::new(LandUseAnalyzer::new(Arc::clone(&lookup))) as Arc<dyn SiteAnalyzer>,
            &config.land_use,
            true,
        ),
        (
            Arc::new(TransitAnalyzer::new(Arc::clone(&lookup))) as Arc<dyn SiteAnalyzer>,
            &config.transit,
            true,
        ),
        (
            Arc::new(FloodRiskAnalyzer::new(Arc::clone(&lookup))) as Arc<dyn SiteAnalyzer>,
            &config.flood_risk,
            true,
        ),
        (
            Arc::new(EnvironmentalScreeningAnalyzer::new(Arc::clone(&lookup))) as Arc<dyn SiteAnalyzer>,
            &config.environmental_screening,
            false,
        ),
    ];

    let mut registry = AnalyzerRegistry::new();
    for (analyzer, cfg, scoring_default) in candidates {
        if !cfg.enabled {
            debug!("Analyzer {} disabled", analyzer.name());
            continue;
        }
        registry.register(analyzer, settings_from(cfg, scoring_default))?;
    }

    if registry.is_empty() {
        return Err(RegistryError::Empty);
    }
    Ok(registry)
}

fn settings_from(cfg: &AnalyzerConfig, scoring_default: bool) -> AnalyzerSettings {
    AnalyzerSettings {
        scoring_relevant: cfg.scoring_relevant.unwrap_or(scoring_default),
        required: cfg.required,
        timeout: Duration::from_secs(cfg.timeout_secs),
        retries: cfg.retries,
        backoff: Duration::from_millis(cfg.backoff_ms),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_order() {
        let registry = build_registry(&AnalyzersConfig::default(), Arc::new(AttributeLookup)).unwrap();
        assert_eq!(
            registry.schema(),
            vec![
                "federal_status",
                "state_scoring",
                "land_use",
                "transit",
                "flood_risk",
                "environmental_screening",
            ]
        );
        assert!(
            !registry
                .settings("environmental_screening")
                .unwrap()
                .scoring_relevant
        );
        assert!(registry.settings("land_use").unwrap().scoring_relevant);
    }

    #[test]
    fn test_disabled_analyzers_are_skipped() {
        let mut config = AnalyzersConfig::default();
        config.transit.enabled = false;
        config.land_use.scoring_relevant = Some(false);

        let registry = build_registry(&config, Arc::new(AttributeLookup)).unwrap();
        assert_eq!(registry.len(), 5);
        assert!(registry.settings("transit").is_none());
        assert!(!registry.settings("land_use").unwrap().scoring_relevant);
    }

    #[test]
    fn test_all_disabled_is_an_error() {
        let mut config = AnalyzersConfig::default();
        for cfg in [
            &mut config.federal_status,
            &mut config.state_scoring,
            &mut config.land_use,
            &mut config.transit,
            &mut config.flood_risk,
            &mut config.environmental_screening,
        ] {
            cfg.enabled = false;
        }
        let err = build_registry(&config, Arc::new(AttributeLookup)).unwrap_err();
        assert_eq!(err, RegistryError::Empty);
    }
}
