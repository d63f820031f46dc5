//! ratebin-qc - rate-binned quality control of monitoring histograms
//!
//! A CLI tool that classifies time-sliced histogram snapshots by the
//! interaction rate they were recorded at, compares each one with a
//! reference of similar rate and reports the time ranges that deviate.
//!
//! Exit codes:
//!   0 - Success (no bad ranges, or no --fail-on-bad set)
//!   1 - Runtime error (invalid arguments, configuration, unreadable rates, etc.)
//!   2 - Bad time ranges found with --fail-on-bad

mod analysis;
mod cli;
mod config;
mod error;
mod histogram;
mod ingest;
mod models;
mod rates;
mod report;
mod scanner;
mod session;

use anyhow::{bail, Context, Result};
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use ingest::{FileHistogramStore, HistogramStore};
use rates::ScalerTable;
use scanner::{ScanConfig, ScannedSource, SourceScanner};
use session::Session;
use std::path::Path;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
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

    init_logging(&args);

    info!("ratebin-qc v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_qc(args) {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("QC session failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate an example .ratebin-qc.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with example settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set the reference runs, plots and trends to check.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete QC workflow. Returns exit code (0 or 2).
fn run_qc(args: Args) -> Result<i32> {
    // Configuration errors are fatal before any processing
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    // Step 1: Discover the histogram sources
    let mut inputs = args.inputs.clone();
    if let Some(ref list) = args.input_list {
        inputs.extend(scanner::read_input_list(list)?);
    }

    let source_scanner = SourceScanner::new(ScanConfig::from(&config.input));
    let sources = source_scanner.scan(&inputs)?;

    if args.dry_run {
        return handle_dry_run(&sources, &config);
    }

    if sources.is_empty() {
        bail!("No histogram sources found in the given inputs");
    }

    println!("📥 Loading {} histogram sources...", sources.len());
    let stores = open_stores(&sources);
    if stores.is_empty() {
        bail!("None of the {} sources could be read", sources.len());
    }

    // Step 2: Load the interaction rates
    let scalers = match args.rates {
        Some(ref path) => {
            let table = ScalerTable::load(path)
                .with_context(|| format!("Failed to load rates from {}", path.display()))?;
            info!(
                "Rates for {} runs from {}",
                table.run_count(),
                table.source_name().unwrap_or("unnamed scaler export")
            );
            table
        }
        None => {
            warn!("No rate file given, all samples will have rate 0");
            ScalerTable::default()
        }
    };

    // Step 3: Run the session
    println!(
        "🔬 Checking {} plots and {} trends...",
        config.plots.len(),
        config.trends.len()
    );
    let session = Session::new(&config, &stores, &scalers);
    let report = session.run(!args.quiet);

    // Step 4: Generate and save the report
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report, &config.report),
    };

    std::fs::write(&args.output, &output)
        .with_context(|| format!("Failed to write report to {}", args.output.display()))?;

    // Print summary
    let bad_samples: usize = report.plots.iter().map(|p| p.bad_intervals.len()).sum();
    println!("\n📊 QC Summary:");
    println!("   Session: {}", report.metadata.session_id);
    println!("   Plots checked: {}", report.metadata.plots_checked);
    println!("   Bad samples: {}", bad_samples);
    println!(
        "   Bad time ranges: {} in {} runs",
        report.total_bad_ranges(),
        report.bad_time_ranges.len()
    );
    for (run, ranges) in &report.bad_time_ranges {
        let spans: Vec<String> = ranges.iter().map(|r| r.hms_range()).collect();
        println!("   - Run {}: {}", run, spans.join(", "));
    }
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
    println!(
        "\n✅ QC complete! Report saved to: {}",
        args.output.display()
    );

    if args.fail_on_bad && report.total_bad_ranges() > 0 {
        eprintln!("\n⛔ Bad time ranges found. Failing (exit code 2).");
        return Ok(2);
    }

    Ok(0)
}

/// Open every source, skipping the ones that cannot be parsed.
fn open_stores(sources: &[ScannedSource]) -> Vec<Box<dyn HistogramStore>> {
    let mut stores: Vec<Box<dyn HistogramStore>> = Vec::with_capacity(sources.len());

    for source in sources {
        match FileHistogramStore::open(&source.path) {
            Ok(store) => {
                debug!(
                    "Opened {} ({} plots)",
                    store.path().display(),
                    store.plot_count()
                );
                stores.push(Box::new(store));
            }
            Err(e) => warn!("Skipping source: {}", e),
        }
    }

    stores
}

/// Handle --dry-run: list sources and plots, exit.
fn handle_dry_run(sources: &[ScannedSource], config: &Config) -> Result<i32> {
    println!("\n🔍 Dry run: listing inputs (no analysis)...\n");

    if sources.is_empty() {
        println!("   No matching source files found.");
    } else {
        println!("   Found {} sources that would be read:\n", sources.len());
        for source in sources {
            println!("     📄 {} ({} bytes)", source.path.display(), source.size);
        }
    }

    println!("\n   Plots to check:");
    for plot in &config.plots {
        println!("     - {}", plot.key());
    }
    for trend in &config.trends {
        println!("     - {} (trend)", trend.key());
    }

    let table = rates::RateIntervalTable::generate(
        config.rates.max,
        config.rates.min,
        config.rates.delta,
    );
    let lowest = table.iter().last().map_or(config.rates.min, |i| i.lower);
    println!(
        "\n   {} rate intervals from {:.2} to {} kHz, {} reference runs",
        table.len(),
        lowest,
        config.rates.max,
        config.reference_map().len()
    );

    println!("\n✅ Dry run complete. No histograms were analyzed.");
    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Ok(Config::load(config_path)?);
    }

    // Try default location
    match Config::load_default()? {
        Some(config) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}
