//! State scoring rules based on the opportunity/resource-area designation.

use super::lookup::{invalid, ReferenceLookup};
use super::SiteAnalyzer;
use crate::error::AnalyzerError;
use crate::models::Site;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct StateScoringAnalyzer {
    lookup: Arc<dyn ReferenceLookup>,
}

impl StateScoringAnalyzer {
    pub fn new(lookup: Arc<dyn ReferenceLookup>) -> Self {
        Self { lookup }
    }
}

/// Points for a resource-area label. Accepts the common spellings.
fn resource_points(label: &str) -> Option<(&'static str, u32)> {
    let normalized = label
        .to_lowercase()
        .replace(" resource", "")
        .replace('-', " ")
        .trim()
        .to_string();

    match normalized.as_str() {
        "highest" => Some(("highest", 8)),
        "high" => Some(("high", 6)),
        "moderate" => Some(("moderate", 4)),
        "low" => Some(("low", 2)),
        "lowest" | "high segregation & poverty" | "high segregation and poverty" => {
            Some(("lowest", 0))
        }
        _ => None,
    }
}

impl SiteAnalyzer for StateScoringAnalyzer {
    fn name(&self) -> &'static str {
        "state_scoring"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["resource_area"]
    }

    fn analyze(&self, site: &Site) -> Result<Value, AnalyzerError> {
        let record = self.lookup.lookup(site, self.required_fields())?;
        let raw = record.text("resource_area")?;
        let (area, points) = resource_points(raw).ok_or_else(|| invalid("resource_area", raw))?;

        Ok(json!({
            "resource_area": area,
            "points": points,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::site_with;
    use crate::analyzers::AttributeLookup;

    #[test]
    fn test_resource_points_normalizes_labels() {
        assert_eq!(resource_points("Highest Resource"), Some(("highest", 8)));
        assert_eq!(resource_points("moderate"), Some(("moderate", 4)));
        assert_eq!(resource_points("High Segregation & Poverty"), Some(("lowest", 0)));
        assert_eq!(resource_points("unknown"), None);
    }

    #[test]
    fn test_unknown_area_is_invalid() {
        let analyzer = StateScoringAnalyzer::new(Arc::new(AttributeLookup));
        let err = analyzer
            .analyze(&site_with(&[("resource_area", "Purple")]))
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidField { .. }));
    }
}
