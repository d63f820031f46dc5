//! Sample ingestion and deduplication.
//!
//! Snapshots of one plot are gathered from every source, reduced to 1D once,
//! and merged when the same run reports the same validity window more than
//! once (typically because the window was split across several archive
//! files).

pub mod store;

pub use store::{FileHistogramStore, HistogramStore, RawSample};

use crate::histogram::{Axis, Histogram, Projection};
use crate::models::{PlotKey, RunNumber, Sample, Validity};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// What happened to a sample handed to [`SampleSet::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New validity window for the run.
    Added,
    /// Joined an existing window and is part of its summed sample.
    Merged,
    /// Joined an existing window whose binning it does not share; it is
    /// left out of the sum.
    Rejected,
}

/// Deduplicated samples of one plot, grouped by run.
///
/// Every snapshot of a `(run, validity)` window is kept until the set is
/// read, then the parts are summed in a canonical order so the result does
/// not depend on the order sources were read in. When the parts disagree
/// on binning, the binning shared by most parts wins, ties going to the
/// canonically smallest part.
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    runs: BTreeMap<RunNumber, BTreeMap<Validity, Vec<Histogram>>>,
}

impl SampleSet {
    /// Add a sample to the window of its run with a bit-identical validity.
    pub fn insert(&mut self, sample: Sample) -> InsertOutcome {
        let label = sample.label();
        let parts = self
            .runs
            .entry(sample.run)
            .or_default()
            .entry(sample.validity)
            .or_default();

        parts.push(sample.histogram);
        if parts.len() == 1 {
            return InsertOutcome::Added;
        }

        let winner = winning_axis(parts);
        let incoming = parts[parts.len() - 1].axis;
        if parts.iter().any(|h| h.axis != winner) {
            warn!(
                "Sample {} has snapshots with different binnings, keeping {} bins on [{}, {})",
                label, winner.n_bins, winner.x_min, winner.x_max
            );
        }
        if incoming == winner {
            debug!("Merged duplicate sample {}", label);
            InsertOutcome::Merged
        } else {
            InsertOutcome::Rejected
        }
    }

    pub fn len(&self) -> usize {
        self.runs.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn run_numbers(&self) -> Vec<RunNumber> {
        self.runs.keys().copied().collect()
    }

    /// Merged samples of `run`, ordered by validity.
    pub fn get(&self, run: RunNumber) -> Vec<Sample> {
        self.runs
            .get(&run)
            .map(|windows| merge_windows(run, windows))
            .unwrap_or_default()
    }

    /// Consume the set, yielding each run's merged samples ordered by validity.
    pub fn into_runs(self) -> impl Iterator<Item = (RunNumber, Vec<Sample>)> {
        self.runs
            .into_iter()
            .map(|(run, windows)| (run, merge_windows(run, &windows)))
    }
}

fn merge_windows(run: RunNumber, windows: &BTreeMap<Validity, Vec<Histogram>>) -> Vec<Sample> {
    windows
        .iter()
        .map(|(validity, parts)| Sample::new(run, *validity, sum_parts(parts)))
        .collect()
}

fn cmp_slices(a: &[f64], b: &[f64]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.total_cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

fn cmp_axes(a: &Axis, b: &Axis) -> Ordering {
    a.n_bins
        .cmp(&b.n_bins)
        .then(a.x_min.total_cmp(&b.x_min))
        .then(a.x_max.total_cmp(&b.x_max))
}

fn canonical_order(a: &Histogram, b: &Histogram) -> Ordering {
    cmp_axes(&a.axis, &b.axis)
        .then_with(|| cmp_slices(&a.values, &b.values))
        .then_with(|| cmp_slices(&a.errors, &b.errors))
}

/// Binning carried by most parts; ties go to the smallest axis.
fn winning_axis(parts: &[Histogram]) -> Axis {
    let mut axes: Vec<Axis> = parts.iter().map(|h| h.axis).collect();
    axes.sort_by(cmp_axes);

    let mut best = axes[0];
    let mut best_count = 0;
    let mut i = 0;
    while i < axes.len() {
        let count = axes[i..].iter().take_while(|a| **a == axes[i]).count();
        if count > best_count {
            best = axes[i];
            best_count = count;
        }
        i += count;
    }
    best
}

/// Sum the parts sharing the winning binning, values in canonical order and
/// errors in quadrature.
fn sum_parts(parts: &[Histogram]) -> Histogram {
    let winner = winning_axis(parts);
    let mut kept: Vec<&Histogram> = parts.iter().filter(|h| h.axis == winner).collect();
    kept.sort_by(|a, b| canonical_order(a, b));

    let mut total = kept[0].clone();
    if kept.len() == 1 {
        return total;
    }

    let mut squares: Vec<f64> = total.errors.iter().map(|e| e * e).collect();
    for part in &kept[1..] {
        for (v, o) in total.values.iter_mut().zip(&part.values) {
            *v += o;
        }
        for (s, e) in squares.iter_mut().zip(&part.errors) {
            *s += e * e;
        }
    }
    total.errors = squares.into_iter().map(f64::sqrt).collect();
    total
}

/// Gather, reduce and deduplicate the snapshots of `key` across `stores`.
pub fn collect_samples(
    stores: &[Box<dyn HistogramStore>],
    key: &PlotKey,
    projection: Projection,
) -> SampleSet {
    let mut set = SampleSet::default();
    let mut merged = 0usize;

    for store in stores {
        let raw_samples = store.fetch(key);
        if raw_samples.is_empty() {
            debug!("Plot {} not found in {}", key, store.name());
            continue;
        }
        debug!(
            "Loaded {} snapshots of {} from {}",
            raw_samples.len(),
            key,
            store.name()
        );

        for raw in raw_samples {
            match raw.histogram.reduce(projection) {
                Ok(histogram) => {
                    let sample = Sample::new(raw.run, raw.validity, histogram);
                    if set.insert(sample) == InsertOutcome::Merged {
                        merged += 1;
                    }
                }
                Err(e) => warn!(
                    "Skipping {} snapshot of run {} from {}: {}",
                    raw.histogram.kind_name(),
                    raw.run,
                    store.name(),
                    e
                ),
            }
        }
    }

    if merged > 0 {
        debug!("{}: {} duplicate snapshots merged", key, merged);
    }
    set
}
