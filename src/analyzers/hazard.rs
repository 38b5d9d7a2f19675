//! Flood risk and environmental/competition screening.

use super::lookup::{invalid, ReferenceLookup};
use super::SiteAnalyzer;
use crate::error::AnalyzerError;
use crate::models::Site;
use serde_json::{json, Value};
use std::sync::Arc;

/// FEMA zones inside the Special Flood Hazard Area.
const SFHA_PREFIXES: &[&str] = &["A", "V"];

pub struct FloodRiskAnalyzer {
    lookup: Arc<dyn ReferenceLookup>,
}

impl FloodRiskAnalyzer {
    pub fn new(lookup: Arc<dyn ReferenceLookup>) -> Self {
        Self { lookup }
    }
}

fn flood_risk(zone: &str) -> Option<(&'static str, u32)> {
    let z = zone.trim().to_uppercase();
    if SFHA_PREFIXES.iter().any(|p| z.starts_with(p)) {
        return Some(("high", 0));
    }
    match z.as_str() {
        "X" | "C" => Some(("minimal", 3)),
        "B" | "X500" | "X (SHADED)" | "SHADED X" => Some(("moderate", 1)),
        "D" => Some(("undetermined", 0)),
        _ => None,
    }
}

impl SiteAnalyzer for FloodRiskAnalyzer {
    fn name(&self) -> &'static str {
        "flood_risk"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["flood_zone"]
    }

    fn analyze(&self, site: &Site) -> Result<Value, AnalyzerError> {
        let record = self.lookup.lookup(site, self.required_fields())?;
        let zone = record.text("flood_zone")?;
        let (risk, points) = flood_risk(zone).ok_or_else(|| invalid("flood_zone", zone))?;
        let sfha = risk == "high";

        Ok(json!({
            "flood_zone": zone.to_uppercase(),
            "risk": risk,
            "special_flood_hazard_area": sfha,
            "points": points,
            "disqualifying": sfha,
        }))
    }
}

/// Counts competing projects near the site.
///
/// A blank or missing count means the lookup had no answer; that is reported
/// as `LookupUnavailable`, never as zero competitors.
pub struct EnvironmentalScreeningAnalyzer {
    lookup: Arc<dyn ReferenceLookup>,
}

impl EnvironmentalScreeningAnalyzer {
    pub fn new(lookup: Arc<dyn ReferenceLookup>) -> Self {
        Self { lookup }
    }
}

impl SiteAnalyzer for EnvironmentalScreeningAnalyzer {
    fn name(&self) -> &'static str {
        "environmental_screening"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["competing_projects"]
    }

    fn analyze(&self, site: &Site) -> Result<Value, AnalyzerError> {
        let record = self.lookup.lookup(site, self.required_fields())?;
        let raw = record.get("competing_projects").ok_or_else(|| {
            AnalyzerError::LookupUnavailable(format!(
                "no competing-project count for {}",
                site.site_id
            ))
        })?;
        let count: u32 = raw.parse().map_err(|_| invalid("competing_projects", raw))?;

        let saturation = match count {
            0..=1 => "low",
            2..=4 => "moderate",
            _ => "high",
        };

        Ok(json!({
            "competing_projects": count,
            "confirmed_zero": count == 0,
            "saturation": saturation,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::site_with;
    use crate::analyzers::AttributeLookup;

    #[test]
    fn test_flood_zones() {
        assert_eq!(flood_risk("AE"), Some(("high", 0)));
        assert_eq!(flood_risk("ve"), Some(("high", 0)));
        assert_eq!(flood_risk("X"), Some(("minimal", 3)));
        assert_eq!(flood_risk("X500"), Some(("moderate", 1)));
        assert_eq!(flood_risk("Q"), None);
    }

    #[test]
    fn test_sfha_is_disqualifying() {
        let payload = FloodRiskAnalyzer::new(Arc::new(AttributeLookup))
            .analyze(&site_with(&[("flood_zone", "ae")]))
            .unwrap();
        assert_eq!(payload["disqualifying"], true);
        assert_eq!(payload["flood_zone"], "AE");
    }

    #[test]
    fn test_confirmed_zero_differs_from_unavailable() {
        let analyzer = EnvironmentalScreeningAnalyzer::new(Arc::new(AttributeLookup));

        let zero = analyzer
            .analyze(&site_with(&[("competing_projects", "0")]))
            .unwrap();
        assert_eq!(zero["confirmed_zero"], true);

        let unavailable = analyzer
            .analyze(&site_with(&[("competing_projects", " ")]))
            .unwrap_err();
        assert!(unavailable.is_transient());
    }
}
