//! Data models for the rate-binned QC engine.
//!
//! This module contains the core data structures shared by the pipeline
//! stages and the report generator: samples, validity windows, flagged
//! intervals and the session report.

use crate::histogram::Histogram;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Run number as assigned by the data-taking system.
pub type RunNumber = u32;

/// Format an epoch-millisecond timestamp as `HH:MM:SS` (UTC).
pub fn format_hms(timestamp_ms: u64) -> String {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "??:??:??".to_string())
}

/// Validity window of a sample, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Validity {
    pub min: u64,
    pub max: u64,
}

impl Validity {
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn duration_ms(&self) -> u64 {
        self.max.saturating_sub(self.min)
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}]", format_hms(self.min), format_hms(self.max))
    }
}

/// Identifies a monitored quantity: detector, task and plot name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlotKey {
    pub detector: String,
    pub task: String,
    pub name: String,
}

impl PlotKey {
    pub fn new(detector: &str, task: &str, name: &str) -> Self {
        Self {
            detector: detector.to_string(),
            task: task.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for PlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.detector, self.task, self.name)
    }
}

/// One measured histogram bound to a run and a validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub run: RunNumber,
    pub validity: Validity,
    pub histogram: Histogram,
}

impl Sample {
    pub fn new(run: RunNumber, validity: Validity, histogram: Histogram) -> Self {
        Self {
            run,
            validity,
            histogram,
        }
    }

    /// Short label used in logs and reports: `run [HH:MM:SS - HH:MM:SS]`.
    pub fn label(&self) -> String {
        format!("{} {}", self.run, self.validity)
    }
}

/// A sample validity window flagged bad for one plot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadInterval {
    pub run: RunNumber,
    pub plot: String,
    pub validity: Validity,
}

/// A maximal, disjoint time span flagged anomalous for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregatedInterval {
    pub run: RunNumber,
    pub start: u64,
    pub end: u64,
}

impl AggregatedInterval {
    pub fn duration_ms(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// `HH:MM:SS - HH:MM:SS` rendering of the span.
    pub fn hms_range(&self) -> String {
        format!("{} - {}", format_hms(self.start), format_hms(self.end))
    }
}

/// Outcome of the deviation check for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Good,
    Bad,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Good => write!(f, "good"),
            Verdict::Bad => write!(f, "bad"),
        }
    }
}

/// Where the denominator of an interval came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum DenominatorSource {
    /// Sum of the samples of a designated reference run.
    Reference { run: RunNumber, samples: usize },
    /// Average of all normalized samples in the interval.
    Average { samples: usize },
}

impl fmt::Display for DenominatorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenominatorSource::Reference { run, samples } => {
                write!(f, "reference run {} ({} samples)", run, samples)
            }
            DenominatorSource::Average { samples } => {
                write!(f, "average of {} samples", samples)
            }
        }
    }
}

/// Per-sample result within one rate interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleReport {
    pub run: RunNumber,
    pub validity: Validity,
    pub rate_khz: f64,
    pub frac_bad: f64,
    pub checked_bins: usize,
    pub bad_bins: usize,
    pub verdict: Verdict,
    /// Set when the sample belongs to the interval's reference run.
    pub is_reference: bool,
    /// Sample shape, normalized when the plot asks for it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<f64>>,
}

/// Results for one rate interval of one plot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalReport {
    pub index: usize,
    pub rate_low: f64,
    pub rate_high: f64,
    pub denominator: Option<DenominatorSource>,
    /// Normalized denominator shape, when one was built.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denominator_shape: Option<Vec<f64>>,
    pub samples: Vec<SampleReport>,
    /// Number of samples classified here but not checked (no denominator).
    pub unchecked: usize,
}

impl IntervalReport {
    pub fn bad_count(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| s.verdict == Verdict::Bad)
            .count()
    }
}

/// Results for one plot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotReport {
    pub plot: String,
    pub samples_loaded: usize,
    pub samples_unclassified: usize,
    pub intervals: Vec<IntervalReport>,
    pub bad_intervals: Vec<BadInterval>,
}

/// One point of a rate trend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub rate_khz: f64,
    pub mean: f64,
}

/// Mean-versus-rate trend of one quantity, per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendReport {
    pub plot: String,
    pub runs: Vec<(RunNumber, Vec<TrendPoint>)>,
}

/// Metadata about the QC session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub session_id: String,
    pub analysis_date: DateTime<Utc>,
    pub sources: usize,
    pub plots_checked: usize,
    pub rate_intervals: usize,
    pub duration_seconds: f64,
}

/// The complete output of a QC session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub metadata: ReportMetadata,
    pub plots: Vec<PlotReport>,
    pub trends: Vec<TrendReport>,
    /// Final disjoint bad time spans, per run, ordered by run.
    pub bad_time_ranges: Vec<(RunNumber, Vec<AggregatedInterval>)>,
}

impl SessionReport {
    pub fn total_bad_ranges(&self) -> usize {
        self.bad_time_ranges.iter().map(|(_, r)| r.len()).sum()
    }
}
