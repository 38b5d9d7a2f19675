//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.sitescreen.toml` files.

use crate::models::ErrorPolicy;
use crate::reader::Strictness;
use crate::report::ReportFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Batch execution settings.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Per-analyzer settings.
    #[serde(default)]
    pub analyzers: AnalyzersConfig,

    /// Classification thresholds.
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory reports are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of sites analyzed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            verbose: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_output_dir() -> String {
    "sitescreen_report".to_string()
}

fn default_concurrency() -> usize {
    8
}

/// Batch execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// What to do after a site-level failure.
    #[serde(default)]
    pub policy: ErrorPolicy,

    /// How invalid input rows are handled.
    #[serde(default)]
    pub strictness: Strictness,

    /// Time slice for all analyzers of one site.
    #[serde(default = "default_site_timeout")]
    pub site_timeout_secs: u64,

    /// Refuse to dispatch more than this many sites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sites: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            policy: ErrorPolicy::default(),
            strictness: Strictness::default(),
            site_timeout_secs: default_site_timeout(),
            max_sites: None,
        }
    }
}

fn default_site_timeout() -> u64 {
    120
}

/// Settings for one analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Override whether classification depends on this analyzer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_relevant: Option<bool>,

    /// Count the site as failed when this analyzer fails.
    #[serde(default)]
    pub required: bool,

    #[serde(default = "default_analyzer_timeout")]
    pub timeout_secs: u64,

    /// Retries after a transient lookup failure.
    #[serde(default)]
    pub retries: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scoring_relevant: None,
            required: false,
            timeout_secs: default_analyzer_timeout(),
            retries: 0,
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_analyzer_timeout() -> u64 {
    30
}

fn default_backoff_ms() -> u64 {
    500
}

/// Settings for the built-in analyzers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzersConfig {
    #[serde(default)]
    pub federal_status: AnalyzerConfig,
    #[serde(default)]
    pub state_scoring: AnalyzerConfig,
    #[serde(default)]
    pub land_use: AnalyzerConfig,
    #[serde(default)]
    pub transit: AnalyzerConfig,
    #[serde(default)]
    pub flood_risk: AnalyzerConfig,
    #[serde(default)]
    pub environmental_screening: AnalyzerConfig,
}

/// Tier thresholds for the points-based classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default = "default_tier_1_min")]
    pub tier_1_min: f64,

    #[serde(default = "default_tier_2_min")]
    pub tier_2_min: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            tier_1_min: default_tier_1_min(),
            tier_2_min: default_tier_2_min(),
        }
    }
}

fn default_tier_1_min() -> f64 {
    25.0
}

fn default_tier_2_min() -> f64 {
    15.0
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Written in place of any missing value.
    #[serde(default = "default_null_marker")]
    pub null_marker: String,

    /// Formats emitted when none are given on the command line.
    #[serde(default = "default_formats")]
    pub formats: Vec<ReportFormat>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            null_marker: default_null_marker(),
            formats: default_formats(),
        }
    }
}

fn default_null_marker() -> String {
    "NA".to_string()
}

fn default_formats() -> Vec<ReportFormat> {
    ReportFormat::ALL.to_vec()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(".sitescreen.toml");

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Reject settings that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.classification.tier_2_min > self.classification.tier_1_min {
            anyhow::bail!(
                "classification.tier_2_min ({}) must not exceed tier_1_min ({})",
                self.classification.tier_2_min,
                self.classification.tier_1_min
            );
        }
        if self.batch.site_timeout_secs == 0 {
            anyhow::bail!("batch.site_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref dir) = args.output_dir {
            self.general.output_dir = dir.display().to_string();
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if let Some(policy) = args.policy {
            self.batch.policy = policy;
        }
        if let Some(strictness) = args.strictness {
            self.batch.strictness = strictness;
        }
        if let Some(timeout) = args.site_timeout {
            self.batch.site_timeout_secs = timeout;
        }
        if let Some(max) = args.max_sites {
            self.batch.max_sites = Some(max);
        }
        if let Some(ref formats) = args.format {
            self.report.formats = formats.clone();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Log level for this run. `quiet` wins over `general.verbose`.
    pub fn log_level(&self, quiet: bool) -> tracing::Level {
        if quiet {
            tracing::Level::ERROR
        } else if self.general.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.concurrency, 8);
        assert_eq!(config.batch.policy, ErrorPolicy::Continue);
        assert_eq!(config.batch.strictness, Strictness::Strict);
        assert_eq!(config.report.null_marker, "NA");
        assert!(config.analyzers.transit.enabled);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output_dir = "out"
concurrency = 2

[batch]
policy = "stop"
strictness = "lenient"

[analyzers.land_use]
required = true
retries = 2

[analyzers.environmental_screening]
enabled = false

[classification]
tier_1_min = 20
tier_2_min = 10

[report]
formats = ["summary", "detailed"]
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output_dir, "out");
        assert_eq!(config.general.concurrency, 2);
        assert_eq!(config.batch.policy, ErrorPolicy::Stop);
        assert_eq!(config.batch.strictness, Strictness::Lenient);
        assert!(config.analyzers.land_use.required);
        assert_eq!(config.analyzers.land_use.retries, 2);
        assert_eq!(config.analyzers.land_use.timeout_secs, 30);
        assert!(!config.analyzers.environmental_screening.enabled);
        assert!(config.analyzers.federal_status.enabled);
        assert_eq!(config.classification.tier_1_min, 20.0);
        assert_eq!(
            config.report.formats,
            vec![ReportFormat::Summary, ReportFormat::Detailed]
        );
    }

    #[test]
    fn test_inverted_thresholds_are_rejected() {
        let mut config = Config::default();
        config.classification.tier_2_min = 30.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[batch]"));
        assert!(toml_str.contains("[analyzers.land_use]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.report.formats.len(), ReportFormat::ALL.len());
    }

    #[test]
    fn test_log_level_follows_verbose_setting() {
        let mut config: Config = toml::from_str("[general]\nverbose = true\n").unwrap();
        assert_eq!(config.log_level(false), tracing::Level::DEBUG);
        assert_eq!(config.log_level(true), tracing::Level::ERROR);

        config.general.verbose = false;
        assert_eq!(config.log_level(false), tracing::Level::INFO);
    }
}
