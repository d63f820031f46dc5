//! Instantaneous-rate providers.
//!
//! The trigger-scaler database is an external collaborator. The engine only
//! needs two things from it: a per-run fetcher that is set up once, and a rate
//! value at a given timestamp. [`ScalerTable`] is the file-backed provider used
//! by the CLI.

use crate::error::SourceError;
use crate::models::RunNumber;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Rate lookups for one run.
pub trait RunRateFetcher {
    /// Rate in Hz at `timestamp_ms`, or `None` when the source has no value.
    fn rate_hz(&self, timestamp_ms: u64) -> Option<f64>;
}

/// Source of per-run rate fetchers.
pub trait RateProvider {
    /// Set up the fetcher for `run`. Called at most once per run and session.
    fn fetcher(&self, run: RunNumber) -> Option<Box<dyn RunRateFetcher>>;
}

/// Scaler readings of one run, sorted by timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalerSeries {
    points: Vec<(u64, f64)>,
}

impl ScalerSeries {
    pub fn new(mut points: Vec<(u64, f64)>) -> Self {
        points.sort_by_key(|(ts, _)| *ts);
        points.dedup_by_key(|(ts, _)| *ts);
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl RunRateFetcher for ScalerSeries {
    /// Linear interpolation between the two readings bracketing the
    /// timestamp; nothing outside the recorded span.
    fn rate_hz(&self, timestamp_ms: u64) -> Option<f64> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if timestamp_ms < first.0 || timestamp_ms > last.0 {
            return None;
        }

        let after = self.points.partition_point(|(ts, _)| *ts < timestamp_ms);
        let (t1, r1) = self.points[after];
        if t1 == timestamp_ms || after == 0 {
            return Some(r1);
        }
        let (t0, r0) = self.points[after - 1];
        let f = (timestamp_ms - t0) as f64 / (t1 - t0) as f64;
        Some(r0 + f * (r1 - r0))
    }
}

#[derive(Debug, Deserialize)]
struct ScalerFile {
    #[serde(default)]
    source: Option<String>,
    runs: HashMap<RunNumber, Vec<(u64, f64)>>,
}

/// File-backed scaler readings for a set of runs.
///
/// Format: `{"source": "ZNC-hadronic", "runs": {"560034": [[ts_ms, rate_hz], ...]}}`.
#[derive(Debug, Clone, Default)]
pub struct ScalerTable {
    source: Option<String>,
    runs: HashMap<RunNumber, ScalerSeries>,
}

impl ScalerTable {
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ScalerFile =
            serde_json::from_str(&content).map_err(|source| SourceError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        let runs = file
            .runs
            .into_iter()
            .map(|(run, points)| (run, ScalerSeries::new(points)))
            .collect();
        Ok(Self {
            source: file.source,
            runs,
        })
    }

    pub fn insert(&mut self, run: RunNumber, series: ScalerSeries) {
        self.runs.insert(run, series);
    }

    /// Name of the scaler source the readings come from, if recorded.
    pub fn source_name(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}

impl RateProvider for ScalerTable {
    fn fetcher(&self, run: RunNumber) -> Option<Box<dyn RunRateFetcher>> {
        let series = self.runs.get(&run)?;
        debug!("Setting up rate fetcher for run {} ({} readings)", run, series.len());
        Some(Box::new(series.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_series_interpolates() {
        let series = ScalerSeries::new(vec![(2000, 30_000.0), (0, 10_000.0)]);
        assert_eq!(series.rate_hz(0), Some(10_000.0));
        assert_eq!(series.rate_hz(1000), Some(20_000.0));
        assert_eq!(series.rate_hz(2000), Some(30_000.0));
        assert_eq!(series.rate_hz(2001), None);
    }

    #[test]
    fn test_series_before_first_reading() {
        let series = ScalerSeries::new(vec![(500, 1.0), (900, 2.0)]);
        assert_eq!(series.rate_hz(499), None);
        assert_eq!(ScalerSeries::default().rate_hz(0), None);
    }

    #[test]
    fn test_load_scaler_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"source": "ZNC-hadronic", "runs": {{"560034": [[0, 1000.0], [60000, 3000.0]]}}}}"#
        )
        .unwrap();

        let table = ScalerTable::load(file.path()).unwrap();
        assert_eq!(table.source_name(), Some("ZNC-hadronic"));
        assert_eq!(table.run_count(), 1);

        let fetcher = table.fetcher(560034).unwrap();
        assert_eq!(fetcher.rate_hz(30000), Some(2000.0));
        assert!(table.fetcher(1).is_none());
    }

    #[test]
    fn test_load_malformed_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            ScalerTable::load(file.path()),
            Err(SourceError::Malformed { .. })
        ));
    }
}
