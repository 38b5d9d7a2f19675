//! Read-only reference data access for analyzers.

use crate::error::AnalyzerError;
use crate::models::Site;
use std::collections::BTreeMap;

/// Source of reference facts about a site (eligibility layers, zoning,
/// hazard maps). Implementations must be safe to share across workers and
/// must not mutate the site.
pub trait ReferenceLookup: Send + Sync {
    /// Fetch the named fields for `site`. A field that the source knows
    /// nothing about is returned as `None`, not as an error.
    fn lookup(&self, site: &Site, fields: &[&str]) -> Result<LookupRecord, AnalyzerError>;
}

/// Reference facts already joined onto the input rows as extra columns.
#[derive(Debug, Clone, Default)]
pub struct AttributeLookup;

impl ReferenceLookup for AttributeLookup {
    fn lookup(&self, site: &Site, fields: &[&str]) -> Result<LookupRecord, AnalyzerError> {
        let values = fields
            .iter()
            .map(|f| (f.to_string(), site.attribute(f).map(str::to_string)))
            .collect();
        Ok(LookupRecord { values })
    }
}

/// Structured answer of one lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupRecord {
    values: BTreeMap<String, Option<String>>,
}

impl LookupRecord {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.map(Into::into)))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).and_then(|v| v.as_deref())
    }

    /// A field that must be present.
    pub fn text(&self, field: &str) -> Result<&str, AnalyzerError> {
        self.get(field)
            .ok_or_else(|| AnalyzerError::MissingField(field.to_string()))
    }

    pub fn flag(&self, field: &str) -> Result<bool, AnalyzerError> {
        let raw = self.text(field)?;
        match raw.to_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "y" | "x" => Ok(true),
            "0" | "false" | "f" | "no" | "n" => Ok(false),
            _ => Err(invalid(field, raw)),
        }
    }

    pub fn number(&self, field: &str) -> Result<f64, AnalyzerError> {
        let raw = self.text(field)?;
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid(field, raw))
    }
}

pub(crate) fn invalid(field: &str, value: &str) -> AnalyzerError {
    AnalyzerError::InvalidField {
        field: field.to_string(),
        value: value.to_string(),
    }
}
