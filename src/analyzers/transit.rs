//! Transit access scoring by distance to the nearest qualifying stop.

use super::lookup::{invalid, ReferenceLookup};
use super::SiteAnalyzer;
use crate::error::AnalyzerError;
use crate::models::Site;
use serde_json::{json, Value};
use std::sync::Arc;

/// (max distance in miles, band label, points), nearest first.
const BANDS: &[(f64, &str, u32)] = &[
    (0.25, "quarter_mile", 7),
    (0.5, "half_mile", 5),
    (1.0, "one_mile", 3),
];

pub struct TransitAnalyzer {
    lookup: Arc<dyn ReferenceLookup>,
}

impl TransitAnalyzer {
    pub fn new(lookup: Arc<dyn ReferenceLookup>) -> Self {
        Self { lookup }
    }
}

impl SiteAnalyzer for TransitAnalyzer {
    fn name(&self) -> &'static str {
        "transit"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["transit_distance_mi"]
    }

    fn analyze(&self, site: &Site) -> Result<Value, AnalyzerError> {
        let record = self.lookup.lookup(site, self.required_fields())?;
        let distance = record.number("transit_distance_mi")?;
        if distance < 0.0 {
            return Err(invalid("transit_distance_mi", &distance.to_string()));
        }

        let (band, points) = BANDS
            .iter()
            .find(|(max, _, _)| distance <= *max)
            .map(|(_, band, points)| (*band, *points))
            .unwrap_or(("beyond_one_mile", 0));

        Ok(json!({
            "distance_mi": distance,
            "band": band,
            "points": points,
        }))
    }
}
