//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// ratebin-qc - rate-binned quality control for monitoring histograms
///
/// Groups time-sliced histogram snapshots by interaction rate, compares
/// each one to a reference of similar rate and reports the time ranges
/// whose shape deviates.
///
/// Examples:
///   ratebin-qc --input data/ --rates scalers.json
///   ratebin-qc --input-list files.txt --rates scalers.json --format json
///   ratebin-qc --input data/ --dry-run
///   ratebin-qc --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Histogram source files or directories to scan
    ///
    /// Directories are searched recursively for files with the configured
    /// extensions. Can be repeated.
    #[arg(short, long = "input", value_name = "PATH")]
    pub inputs: Vec<PathBuf>,

    /// File containing whitespace-separated source paths
    #[arg(long, value_name = "FILE")]
    pub input_list: Option<PathBuf>,

    /// Scaler export with the interaction rate of each run
    ///
    /// Without it every sample has rate 0 and falls outside the table.
    #[arg(short, long, value_name = "FILE", env = "RATEBIN_QC_RATES")]
    pub rates: Option<PathBuf>,

    /// Output file path for the report
    #[arg(
        short,
        long,
        default_value = "ratebin_qc_report.md",
        value_name = "FILE"
    )]
    pub output: PathBuf,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .ratebin-qc.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Session identifier shown in the report, e.g. the data period
    #[arg(long, value_name = "ID", env = "RATEBIN_QC_SESSION")]
    pub session_id: Option<String>,

    /// Never flag samples of the run used as an interval's reference
    #[arg(long)]
    pub exempt_reference_run: bool,

    /// Export sample and denominator shapes in the report
    #[arg(long)]
    pub shapes: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Exit with code 2 when any bad time range is found
    ///
    /// Useful for automated pipelines.
    #[arg(long)]
    pub fail_on_bad: bool,

    /// Dry run: list the sources and configured plots without analyzing
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .ratebin-qc.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.inputs.is_empty() && self.input_list.is_none() {
            return Err("At least one --input or an --input-list is required".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref id) = self.session_id {
            if id.trim().is_empty() {
                return Err("Session id must not be empty".to_string());
            }
        }

        if let Some(ref list) = self.input_list {
            if !list.is_file() {
                return Err(format!("Input list does not exist: {}", list.display()));
            }
        }

        if let Some(ref rates) = self.rates {
            if !rates.is_file() {
                return Err(format!("Rate file does not exist: {}", rates.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
