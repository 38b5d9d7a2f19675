//! Site record reader for loading and validating batches of sites.
//!
//! Sources are CSV extracts with a header row. Identifier and coordinate
//! columns are recognized by name; every other column is carried through
//! untouched for the final report.

use crate::error::{RowProblem, SchemaError};
use crate::models::Site;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

const ID_COLUMNS: &[&str] = &["site_id", "id", "site", "project_id"];
const LAT_COLUMNS: &[&str] = &["latitude", "lat"];
const LON_COLUMNS: &[&str] = &["longitude", "lon", "lng"];

/// How invalid rows are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Any invalid row rejects the whole source.
    #[default]
    Strict,
    /// Invalid rows are skipped and reported as warnings.
    Lenient,
}

/// Sites read from one or more extracts, in source order.
#[derive(Debug, Clone, Default)]
pub struct SiteBatch {
    pub sites: Vec<Site>,
    /// Pass-through column names, first-seen order.
    pub extra_columns: Vec<String>,
    /// Rows skipped under lenient loading.
    pub warnings: Vec<RowProblem>,
    /// Names of the extracts that make up this batch.
    pub sources: Vec<String>,
}

impl SiteBatch {
    /// Append another extract. Positions continue from this batch.
    pub fn extend(&mut self, other: SiteBatch) {
        let offset = self.sites.len();
        for mut site in other.sites {
            site.position += offset;
            self.sites.push(site);
        }
        for column in other.extra_columns {
            if !self.extra_columns.contains(&column) {
                self.extra_columns.push(column);
            }
        }
        self.warnings.extend(other.warnings);
        self.sources.extend(other.sources);
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Number of distinct `site_id`s. Joined extracts may repeat an id.
    pub fn distinct_sites(&self) -> usize {
        self.sites
            .iter()
            .map(|s| s.site_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Column positions resolved from the header.
struct HeaderLayout {
    id: usize,
    lat: usize,
    lon: usize,
    extras: Vec<(usize, String)>,
}

impl HeaderLayout {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, SchemaError> {
        let find = |candidates: &[&str], label: &str| {
            headers
                .iter()
                .position(|h| candidates.contains(&h.trim().to_lowercase().as_str()))
                .ok_or_else(|| SchemaError::MissingColumn(label.to_string()))
        };

        let id = find(ID_COLUMNS, "site_id")?;
        let lat = find(LAT_COLUMNS, "latitude")?;
        let lon = find(LON_COLUMNS, "longitude")?;

        let extras = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id && *i != lat && *i != lon)
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        Ok(Self { id, lat, lon, extras })
    }
}

/// Loads site records from tabular sources.
pub struct SiteRecordReader {
    strictness: Strictness,
}

impl SiteRecordReader {
    pub fn new(strictness: Strictness) -> Self {
        Self { strictness }
    }

    /// Load a CSV file. The file name becomes the extract name.
    pub fn load_path(&self, path: &Path) -> Result<SiteBatch, SchemaError> {
        let file = File::open(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        self.load(file, &name)
    }

    /// Load sites from any reader, validating every row.
    pub fn load<R: Read>(&self, source: R, name: &str) -> Result<SiteBatch, SchemaError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .flexible(true)
            .from_reader(source);

        let headers = csv_reader.headers()?.clone();
        if headers.is_empty() {
            return Err(SchemaError::MissingColumn("site_id".to_string()));
        }
        let layout = HeaderLayout::resolve(&headers)?;

        let mut sites = Vec::new();
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        for (index, record) in csv_reader.records().enumerate() {
            let row = index + 1;
            let record = record?;

            match parse_row(&record, &layout, row) {
                Ok((site_id, latitude, longitude, attributes)) => {
                    if !seen.insert(site_id.clone()) {
                        problems.push(RowProblem {
                            row,
                            site_id: Some(site_id),
                            reason: "duplicate site_id".to_string(),
                        });
                        continue;
                    }
                    sites.push(Site {
                        site_id,
                        latitude,
                        longitude,
                        attributes,
                        position: sites.len(),
                        source: name.to_string(),
                    });
                }
                Err(problem) => problems.push(problem),
            }
        }

        if !problems.is_empty() {
            match self.strictness {
                Strictness::Strict => return Err(SchemaError::InvalidRows(problems)),
                Strictness::Lenient => {
                    for problem in &problems {
                        warn!("Skipping {} in {}", problem, name);
                    }
                }
            }
        }

        debug!("Loaded {} sites from {}", sites.len(), name);

        Ok(SiteBatch {
            sites,
            extra_columns: layout.extras.into_iter().map(|(_, h)| h).collect(),
            warnings: problems,
            sources: vec![name.to_string()],
        })
    }
}

type ParsedRow = (String, f64, f64, BTreeMap<String, String>);

fn parse_row(
    record: &csv::StringRecord,
    layout: &HeaderLayout,
    row: usize,
) -> Result<ParsedRow, RowProblem> {
    let site_id = record.get(layout.id).unwrap_or("").trim().to_string();
    let problem = |reason: String| RowProblem {
        row,
        site_id: if site_id.is_empty() { None } else { Some(site_id.clone()) },
        reason,
    };

    if site_id.is_empty() {
        return Err(problem("empty site_id".to_string()));
    }

    let latitude = parse_coordinate(record.get(layout.lat), "latitude", 90.0).map_err(&problem)?;
    let longitude =
        parse_coordinate(record.get(layout.lon), "longitude", 180.0).map_err(&problem)?;

    // Pass-through values are kept exactly as read.
    let attributes = layout
        .extras
        .iter()
        .map(|(i, header)| (header.clone(), record.get(*i).unwrap_or("").to_string()))
        .collect();

    Ok((site_id, latitude, longitude, attributes))
}

fn parse_coordinate(raw: Option<&str>, label: &str, limit: f64) -> Result<f64, String> {
    let raw = raw.unwrap_or("").trim();
    if raw.is_empty() {
        return Err(format!("missing {}", label));
    }
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("{} '{}' is not a number", label, raw))?;
    if !value.is_finite() || value < -limit || value > limit {
        return Err(format!("{} {} outside [-{}, {}]", label, value, limit, limit));
    }
    Ok(value)
}
