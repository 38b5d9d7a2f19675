//! Land-use suitability from the zoning designation.

use super::lookup::ReferenceLookup;
use super::SiteAnalyzer;
use crate::error::AnalyzerError;
use crate::models::Site;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suitability {
    Suitable,
    Conditional,
    Unsuitable,
}

impl Suitability {
    fn label(self) -> &'static str {
        match self {
            Suitability::Suitable => "suitable",
            Suitability::Conditional => "conditional",
            Suitability::Unsuitable => "unsuitable",
        }
    }

    fn points(self) -> u32 {
        match self {
            Suitability::Suitable => 5,
            Suitability::Conditional => 2,
            Suitability::Unsuitable => 0,
        }
    }
}

fn classify_zoning(zoning: &str) -> Suitability {
    let z = zoning.to_uppercase();
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| z.starts_with(p));

    if starts(&["R", "MF", "MU", "RESIDENTIAL", "MULTI", "MIXED"]) {
        Suitability::Suitable
    } else if starts(&["C", "COMMERCIAL", "PD", "SP"]) {
        Suitability::Conditional
    } else {
        Suitability::Unsuitable
    }
}

pub struct LandUseAnalyzer {
    lookup: Arc<dyn ReferenceLookup>,
}

impl LandUseAnalyzer {
    pub fn new(lookup: Arc<dyn ReferenceLookup>) -> Self {
        Self { lookup }
    }
}

impl SiteAnalyzer for LandUseAnalyzer {
    fn name(&self) -> &'static str {
        "land_use"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["zoning"]
    }

    fn analyze(&self, site: &Site) -> Result<Value, AnalyzerError> {
        let record = self.lookup.lookup(site, self.required_fields())?;
        let zoning = record.text("zoning")?;
        let suitability = classify_zoning(zoning);

        Ok(json!({
            "zoning": zoning,
            "suitability": suitability.label(),
            "points": suitability.points(),
            "disqualifying": suitability == Suitability::Unsuitable,
        }))
    }
}
