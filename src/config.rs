//! Configuration file handling.
//!
//! This module handles loading, validating and merging the session
//! configuration from `.ratebin-qc.toml` files. A configuration that cannot
//! be read or does not validate aborts the session before any processing.

use crate::analysis::reference::ReferenceRunMap;
use crate::analysis::deviation::CheckSettings;
use crate::error::ConfigError;
use crate::histogram::Projection;
use crate::models::{PlotKey, RunNumber};
use crate::rates::classifier::DEFAULT_RATE_STEP_MS;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".ratebin-qc.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Rate interval table.
    #[serde(default)]
    pub rates: RatesConfig,

    /// Analysis policy.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Input discovery.
    #[serde(default)]
    pub input: InputConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,

    /// Reference runs, each covering rates up to `rate_max`.
    #[serde(default)]
    pub reference_runs: Vec<ReferenceRunConfig>,

    /// Plots compared against the rate-binned references.
    #[serde(default)]
    pub plots: Vec<PlotConfig>,

    /// Quantities whose mean is trended against the rate.
    #[serde(default)]
    pub trends: Vec<TrendConfig>,
}

/// General session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session identifier, shown in the report.
    #[serde(default = "default_session_id")]
    pub id: String,

    /// Spacing of rate lookups inside a validity window, in milliseconds.
    #[serde(default = "default_rate_step_ms")]
    pub rate_step_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: default_session_id(),
            rate_step_ms: default_rate_step_ms(),
        }
    }
}

fn default_session_id() -> String {
    "qc-session".to_string()
}

fn default_rate_step_ms() -> u64 {
    DEFAULT_RATE_STEP_MS
}

/// Geometric rate interval table, in kHz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesConfig {
    #[serde(default = "default_rate_max")]
    pub max: f64,

    #[serde(default = "default_rate_min")]
    pub min: f64,

    /// Relative width of each interval.
    #[serde(default = "default_rate_delta")]
    pub delta: f64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            max: default_rate_max(),
            min: default_rate_min(),
            delta: default_rate_delta(),
        }
    }
}

fn default_rate_max() -> f64 {
    50.0
}

fn default_rate_min() -> f64 {
    5.0
}

fn default_rate_delta() -> f64 {
    0.1
}

/// Analysis policy settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Never flag samples of the run that provides an interval's reference.
    #[serde(default)]
    pub exempt_reference_run: bool,
}

/// Input discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Extensions of source files picked up when walking directories.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory or file names skipped when walking directories.
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Maximum number of sources to read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_files: Option<usize>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            excludes: Vec::new(),
            max_files: None,
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["json".to_string()]
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// List every checked sample, not only the bad ones.
    #[serde(default = "default_true")]
    pub list_good_samples: bool,

    /// Export sample and denominator shapes in JSON reports.
    #[serde(default)]
    pub include_shapes: bool,

    /// Number of most affected runs listed in the summary.
    #[serde(default = "default_top_runs")]
    pub top_runs: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            list_good_samples: true,
            include_shapes: false,
            top_runs: default_top_runs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_top_runs() -> usize {
    5
}

/// A reference run and the highest rate (kHz) it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRunConfig {
    pub number: RunNumber,
    pub rate_max: f64,
}

/// Deviation check settings of one plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotConfig {
    pub detector: String,
    pub task: String,
    pub name: String,

    /// Lower edge of the checked x range; equal edges mean the full axis.
    #[serde(default)]
    pub check_range_min: f64,

    #[serde(default)]
    pub check_range_max: f64,

    /// Maximum tolerated |ratio - 1| before error allowance.
    #[serde(default = "default_check_threshold")]
    pub check_threshold: f64,

    /// Ratio errors added to the threshold.
    #[serde(default = "default_deviation_nsigma")]
    pub check_deviation_nsigma: f64,

    /// Fraction of bad bins above which a sample is bad.
    #[serde(default = "default_max_bad_bins_frac")]
    pub max_bad_bins_frac: f64,

    /// Normalize exported sample shapes to unit integral.
    #[serde(default = "default_true")]
    pub normalize: bool,

    /// Axis kept when the plot is a 2D histogram.
    #[serde(default)]
    pub projection: Projection,
}

fn default_check_threshold() -> f64 {
    0.1
}

fn default_deviation_nsigma() -> f64 {
    2.0
}

fn default_max_bad_bins_frac() -> f64 {
    0.1
}

impl PlotConfig {
    pub fn key(&self) -> PlotKey {
        PlotKey::new(&self.detector, &self.task, &self.name)
    }

    pub fn check_settings(&self) -> CheckSettings {
        CheckSettings {
            range_min: self.check_range_min,
            range_max: self.check_range_max,
            threshold: self.check_threshold,
            deviation_nsigma: self.check_deviation_nsigma,
            max_bad_bins_frac: self.max_bad_bins_frac,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPlot {
            plot: self.key().to_string(),
            reason: reason.to_string(),
        };

        if self.detector.is_empty() || self.task.is_empty() || self.name.is_empty() {
            return Err(invalid("detector, task and name must not be empty"));
        }
        if self.check_range_min > self.check_range_max {
            return Err(invalid("check_range_min is above check_range_max"));
        }
        if !(self.check_threshold >= 0.0) {
            return Err(invalid("check_threshold must not be negative"));
        }
        if !(self.check_deviation_nsigma >= 0.0) {
            return Err(invalid("check_deviation_nsigma must not be negative"));
        }
        if !(0.0..=1.0).contains(&self.max_bad_bins_frac) {
            return Err(invalid("max_bad_bins_frac must be within [0, 1]"));
        }
        Ok(())
    }
}

/// A quantity trended against the rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    pub detector: String,
    pub task: String,
    pub name: String,

    #[serde(default)]
    pub projection: Projection,
}

impl TrendConfig {
    pub fn key(&self) -> PlotKey {
        PlotKey::new(&self.detector, &self.task, &self.name)
    }
}

impl Config {
    /// Load and validate configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be used.
    pub fn load_default() -> Result<Option<Self>, ConfigError> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Check the settings that would make the session meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.id.trim().is_empty() {
            return Err(ConfigError::EmptySessionId);
        }
        if self.session.rate_step_ms == 0 {
            return Err(ConfigError::InvalidRates(
                "rate_step_ms must be at least 1".to_string(),
            ));
        }

        let rates = &self.rates;
        if !rates.min.is_finite() || !rates.max.is_finite() {
            return Err(ConfigError::InvalidRates(format!(
                "min and max must be finite, got {} and {}",
                rates.min, rates.max
            )));
        }
        if !(rates.min > 0.0) {
            return Err(ConfigError::InvalidRates(format!(
                "min must be positive, got {}",
                rates.min
            )));
        }
        if !(rates.max > rates.min) {
            return Err(ConfigError::InvalidRates(format!(
                "max ({}) must be above min ({})",
                rates.max, rates.min
            )));
        }
        if !(rates.delta > 0.0 && rates.delta < 1.0) {
            return Err(ConfigError::InvalidRates(format!(
                "delta must be within (0, 1), got {}",
                rates.delta
            )));
        }

        for reference in &self.reference_runs {
            if !(reference.rate_max > 0.0) {
                return Err(ConfigError::InvalidRates(format!(
                    "reference run {} has non-positive rate_max",
                    reference.number
                )));
            }
        }

        for plot in &self.plots {
            plot.validate()?;
        }
        Ok(())
    }

    pub fn reference_map(&self) -> ReferenceRunMap {
        ReferenceRunMap::new(
            self.reference_runs
                .iter()
                .map(|r| (r.rate_max, r.number)),
        )
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref id) = args.session_id {
            self.session.id = id.clone();
        }
        if args.exempt_reference_run {
            self.analysis.exempt_reference_run = true;
        }
        if args.shapes {
            self.report.include_shapes = true;
        }
    }

    /// A populated example configuration.
    pub fn example() -> Self {
        let reference_runs = [(15.0, 560070), (29.0, 560034), (40.0, 560033), (50.0, 560031)]
            .into_iter()
            .map(|(rate_max, number)| ReferenceRunConfig { number, rate_max })
            .collect();

        let plot = |detector: &str, task: &str, name: &str| PlotConfig {
            detector: detector.to_string(),
            task: task.to_string(),
            name: name.to_string(),
            check_range_min: -0.8,
            check_range_max: 0.8,
            check_threshold: default_check_threshold(),
            check_deviation_nsigma: default_deviation_nsigma(),
            max_bad_bins_frac: default_max_bad_bins_frac(),
            normalize: true,
            projection: Projection::X,
        };

        Self {
            reference_runs,
            plots: vec![
                plot("ITS", "Tracks", "EtaDistribution"),
                plot("TPC", "Tracks", "hEta"),
            ],
            trends: vec![TrendConfig {
                detector: "ITS".to_string(),
                task: "Clusters".to_string(),
                name: "ROFSize".to_string(),
                projection: Projection::X,
            }],
            ..Self::default()
        }
    }

    /// Generate the content of an example configuration file.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::example()).unwrap_or_else(|_| String::new())
    }
}
