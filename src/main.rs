//! sitescreen - concurrent batch screening of candidate development sites
//!
//! Reads site extracts, runs every enabled analyzer on each site through a
//! bounded worker pool, classifies sites into tiers and writes reports.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (unreadable extract, bad config, report write failure)
//!   2 - Batch aborted or truncated, or sites failed with --fail-on-failures

mod analysis;
mod analyzers;
mod cli;
mod config;
mod error;
mod models;
mod orchestrator;
mod reader;
mod report;

use analysis::TieredPolicy;
use analyzers::AttributeLookup;
use anyhow::{Context, Result};
use cli::Args;
use config::Config;
use orchestrator::{BatchOrchestrator, CancelToken, OrchestratorOptions, ProgressBarSink, SiteQuota};
use reader::{SiteBatch, SiteRecordReader};
use report::{ReportEmitter, SourceInfo};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration first; `general.verbose` decides the log level
    let (mut config, config_origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    init_logging(config.log_level(args.quiet));

    info!("sitescreen v{}", env!("CARGO_PKG_VERSION"));
    info!("{}", config_origin);
    debug!("Arguments: {:?}", args);

    match run_screening(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Screening failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .sitescreen.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(".sitescreen.toml");

    if path.exists() {
        eprintln!("⚠️  .sitescreen.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write .sitescreen.toml")?;

    println!("✅ Created .sitescreen.toml with default settings.");
    println!("   Edit it to tune analyzers, tier thresholds and report formats.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete screening workflow. Returns the exit code.
async fn run_screening(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    config.validate()?;

    // Step 1: Read the extracts
    println!("📥 Reading {} extract(s)...", args.input.len());
    let batch = read_extracts(&args.input, &config)?;
    for warning in &batch.warnings {
        warn!("Skipped {}", warning);
    }
    println!(
        "   {} sites loaded, {} rows skipped",
        batch.len(),
        batch.warnings.len()
    );

    // Step 2: Build the analyzer registry
    let registry = analyzers::build_registry(&config.analyzers, Arc::new(AttributeLookup))
        .context("Failed to build analyzer registry")?;
    info!("Analyzers: {}", registry.schema().join(", "));

    for (analyzer, field) in registry.missing_fields(&batch.extra_columns) {
        warn!(
            "No '{}' column in the extracts; {} will report errors",
            field, analyzer
        );
    }

    if args.dry_run {
        return handle_dry_run(&batch, &registry.schema());
    }

    // Step 3: Run the batch
    println!(
        "\n🔬 Screening with {} analyzers ({} workers, policy {})...",
        registry.len(),
        config.general.concurrency,
        config.batch.policy
    );

    let options = OrchestratorOptions {
        concurrency: config.general.concurrency,
        site_timeout: Duration::from_secs(config.batch.site_timeout_secs),
    };
    let cancel = CancelToken::new();
    let mut orchestrator = BatchOrchestrator::new(
        options,
        Arc::new(TieredPolicy::from(&config.classification)),
    )
    .with_cancel(cancel.clone());

    if let Some(max) = config.batch.max_sites {
        orchestrator = orchestrator.with_guard(Arc::new(SiteQuota { max }));
    }

    let progress = if args.quiet {
        None
    } else {
        let bar = Arc::new(ProgressBarSink::new(batch.distinct_sites()));
        orchestrator = orchestrator.with_progress(bar.clone());
        Some(bar)
    };

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing running sites");
            cancel.cancel();
        }
    });

    let SiteBatch {
        sites,
        extra_columns,
        warnings,
        sources,
    } = batch;

    let outcome = orchestrator
        .submit_batch(sites, &registry, config.batch.policy)
        .await;

    if let Some(bar) = progress {
        bar.finish();
    }

    // Step 4: Write reports
    println!("\n📝 Writing reports...");
    let duration = start_time.elapsed().as_secs_f64();
    let report = report::assemble(
        outcome,
        SourceInfo {
            sources,
            extra_columns,
            warnings,
        },
        duration,
    );

    let out_dir = PathBuf::from(&config.general.output_dir);
    let written = ReportEmitter::new(config.report.null_marker.clone())
        .emit(&report, &config.report.formats, &out_dir)
        .with_context(|| format!("Failed to write reports to {}", out_dir.display()))?;

    // Print summary
    let job = &report.job;
    println!("\n📊 Screening Summary:");
    println!("   Status: {}", job.status);
    println!(
        "   Sites: {} completed | {} failed | {} not dispatched",
        job.completed, job.failed, job.aborted
    );
    let tiers: Vec<String> = report
        .summary
        .by_classification
        .iter()
        .map(|(tier, count)| format!("{}: {}", tier, count))
        .collect();
    println!("   {}", tiers.join(" | "));
    if !report.duplicates.is_empty() {
        println!("   Duplicate records resolved: {}", report.duplicates.len());
    }
    println!("   Duration: {:.1}s", duration);
    for path in &written {
        println!("   📄 {}", path.display());
    }

    if !report.success {
        eprintln!("\n⛔ Batch did not complete every site (exit code 2).");
        return Ok(2);
    }

    if args.fail_on_failures && job.failed > 0 {
        eprintln!(
            "\n⛔ {} site(s) failed. Failing (exit code 2).",
            job.failed
        );
        return Ok(2);
    }

    println!("\n✅ Screening complete! Reports saved to: {}", out_dir.display());
    Ok(0)
}

/// Read and join every extract.
fn read_extracts(paths: &[PathBuf], config: &Config) -> Result<SiteBatch> {
    let reader = SiteRecordReader::new(config.batch.strictness);
    let mut batch = SiteBatch::default();

    for path in paths {
        let extract = reader
            .load_path(path)
            .with_context(|| format!("Failed to read extract {}", path.display()))?;
        info!("{}: {} sites", path.display(), extract.len());
        batch.extend(extract);
    }

    Ok(batch)
}

/// Handle --dry-run: report what would be screened, exit.
fn handle_dry_run(batch: &SiteBatch, schema: &[String]) -> Result<i32> {
    println!("\n🔍 Dry run: no analyzers will be called.\n");
    println!("   Sources: {}", batch.sources.join(", "));
    println!("   Sites: {}", batch.len());
    println!("   Analyzers: {}", schema.join(", "));
    if !batch.extra_columns.is_empty() {
        println!("   Pass-through columns: {}", batch.extra_columns.join(", "));
    }
    for warning in &batch.warnings {
        println!("   ⚠️  {}", warning);
    }

    println!("\n✅ Dry run complete.");
    Ok(0)
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is set up, so it returns a note on where the
/// configuration came from instead of logging it.
fn load_config(args: &Args) -> Result<(Config, String)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, format!("Loaded config from: {}", config_path.display())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, "Loaded default config from .sitescreen.toml".to_string())),
        Ok(None) => Ok((Config::default(), "No config file found, using defaults".to_string())),
        Err(e) => {
            eprintln!("⚠️  Failed to load config: {:#}", e);
            Ok((Config::default(), "Using default config".to_string()))
        }
    }
}
