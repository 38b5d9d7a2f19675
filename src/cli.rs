//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::ErrorPolicy;
use crate::reader::Strictness;
use crate::report::ReportFormat;
use clap::Parser;
use std::path::PathBuf;

/// sitescreen - concurrent batch screening of candidate development sites
///
/// Reads one or more CSV extracts of candidate sites, runs every enabled
/// analyzer on each site, classifies sites into tiers and writes summary,
/// detailed and per-tier reports.
///
/// Examples:
///   sitescreen --input sites.csv
///   sitescreen --input north.csv --input south.csv --output-dir out
///   sitescreen --input sites.csv --policy stop --strictness lenient
///   sitescreen --input sites.csv --format summary,markdown --dry-run
///   sitescreen --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Site extract to screen (CSV with a header row)
    ///
    /// Repeat to join several extracts into one batch.
    #[arg(short, long, value_name = "FILE", required_unless_present = "init_config")]
    pub input: Vec<PathBuf>,

    /// Directory for report files
    #[arg(short, long, value_name = "DIR", env = "SITESCREEN_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// What to do when a site fails
    #[arg(long, value_name = "POLICY")]
    pub policy: Option<ErrorPolicy>,

    /// How to treat invalid rows in an extract
    ///
    /// strict rejects the whole extract, lenient skips the row with a warning.
    #[arg(long, value_name = "MODE")]
    pub strictness: Option<Strictness>,

    /// Number of sites analyzed concurrently
    #[arg(long, value_name = "NUM", env = "SITESCREEN_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Time budget for all analyzers of one site, in seconds
    #[arg(long, value_name = "SECS")]
    pub site_timeout: Option<u64>,

    /// Refuse to dispatch more than this many sites
    #[arg(long, value_name = "COUNT")]
    pub max_sites: Option<usize>,

    /// Report formats to write (comma-separated)
    ///
    /// Example: --format summary,partitioned
    #[arg(long, value_name = "FORMATS", value_delimiter = ',')]
    pub format: Option<Vec<ReportFormat>>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .sitescreen.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Read and validate the extracts without running any analyzer
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .sitescreen.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Exit with code 2 when any site failed
    ///
    /// Useful for CI pipelines.
    #[arg(long)]
    pub fail_on_failures: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.input.is_empty() {
            return Err("At least one --input extract is required".to_string());
        }

        for path in &self.input {
            if !path.is_file() {
                return Err(format!("Input extract does not exist: {}", path.display()));
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.site_timeout == Some(0) {
            return Err("Site timeout must be at least 1 second".to_string());
        }

        if self.max_sites == Some(0) {
            return Err("Max sites must be at least 1".to_string());
        }

        if let Some(ref formats) = self.format {
            if formats.is_empty() {
                return Err("At least one report format is required".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn make_args(input: PathBuf) -> Args {
        Args {
            input: vec![input],
            output_dir: None,
            policy: None,
            strictness: None,
            concurrency: None,
            site_timeout: None,
            max_sites: None,
            format: None,
            config: None,
            verbose: false,
            quiet: false,
            dry_run: false,
            init_config: false,
            fail_on_failures: false,
        }
    }

    #[test]
    fn test_validation_accepts_existing_input() {
        let file = NamedTempFile::new().unwrap();
        assert!(make_args(file.path().to_path_buf()).validate().is_ok());
    }

    #[test]
    fn test_validation_missing_input() {
        let args = make_args(PathBuf::from("/nonexistent/sites.csv"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_values() {
        let file = NamedTempFile::new().unwrap();
        let mut args = make_args(file.path().to_path_buf());
        args.concurrency = Some(0);
        assert!(args.validate().is_err());

        args.concurrency = Some(4);
        args.site_timeout = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let file = NamedTempFile::new().unwrap();
        let mut args = make_args(file.path().to_path_buf());
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_init_config_skips_validation() {
        let mut args = make_args(PathBuf::from("/nonexistent/sites.csv"));
        args.init_config = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_parse_formats_and_policy() {
        let args = Args::try_parse_from([
            "sitescreen",
            "--input",
            "a.csv",
            "--input",
            "b.csv",
            "--policy",
            "stop",
            "--format",
            "summary,partitioned",
        ])
        .unwrap();

        assert_eq!(args.input.len(), 2);
        assert_eq!(args.policy, Some(ErrorPolicy::Stop));
        assert_eq!(
            args.format,
            Some(vec![ReportFormat::Summary, ReportFormat::Partitioned])
        );
    }
}
