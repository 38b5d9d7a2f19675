//! Federal tax-credit zone status (Qualified Census Tract / Difficult
//! Development Area).

use super::lookup::ReferenceLookup;
use super::SiteAnalyzer;
use crate::error::AnalyzerError;
use crate::models::Site;
use serde_json::{json, Value};
use std::sync::Arc;

/// Points awarded when the site earns the federal basis boost.
const BASIS_BOOST_POINTS: u32 = 10;

pub struct FederalStatusAnalyzer {
    lookup: Arc<dyn ReferenceLookup>,
}

impl FederalStatusAnalyzer {
    pub fn new(lookup: Arc<dyn ReferenceLookup>) -> Self {
        Self { lookup }
    }
}

impl SiteAnalyzer for FederalStatusAnalyzer {
    fn name(&self) -> &'static str {
        "federal_status"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["qct", "dda"]
    }

    fn analyze(&self, site: &Site) -> Result<Value, AnalyzerError> {
        let record = self.lookup.lookup(site, self.required_fields())?;
        let qct = record.flag("qct")?;
        let dda = record.flag("dda")?;
        let basis_boost = qct || dda;

        Ok(json!({
            "qct": qct,
            "dda": dda,
            "basis_boost": basis_boost,
            "points": if basis_boost { BASIS_BOOST_POINTS } else { 0 },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::site_with;
    use crate::analyzers::AttributeLookup;

    #[test]
    fn test_dda_alone_earns_basis_boost() {
        let analyzer = FederalStatusAnalyzer::new(Arc::new(AttributeLookup));
        let payload = analyzer
            .analyze(&site_with(&[("qct", "no"), ("dda", "yes")]))
            .unwrap();

        assert_eq!(payload["basis_boost"], true);
        assert_eq!(payload["points"], 10);
    }

    #[test]
    fn test_missing_flag_is_an_error() {
        let analyzer = FederalStatusAnalyzer::new(Arc::new(AttributeLookup));
        let err = analyzer.analyze(&site_with(&[("qct", "1")])).unwrap_err();
        assert_eq!(err, AnalyzerError::MissingField("dda".into()));
    }
}
