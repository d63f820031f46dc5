//! Attach a mean rate and a rate-interval index to every sample.

use super::intervals::RateIntervalTable;
use super::provider::{RateProvider, RunRateFetcher};
use crate::ingest::SampleSet;
use crate::models::{RunNumber, Sample, Validity};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Default spacing of rate lookups inside a validity window.
pub const DEFAULT_RATE_STEP_MS: u64 = 30_000;

/// Per-run rate fetchers, set up once and kept for the whole session.
pub struct RateCache<'p> {
    provider: &'p dyn RateProvider,
    step_ms: u64,
    fetchers: HashMap<RunNumber, Option<Box<dyn RunRateFetcher>>>,
}

impl<'p> RateCache<'p> {
    pub fn new(provider: &'p dyn RateProvider, step_ms: u64) -> Self {
        Self {
            provider,
            step_ms: step_ms.max(1),
            fetchers: HashMap::new(),
        }
    }

    /// Number of runs a fetcher setup was attempted for.
    pub fn runs_seen(&self) -> usize {
        self.fetchers.len()
    }

    /// Mean rate in kHz over `[validity.min, validity.max)`, sampled every
    /// `step_ms`. Returns 0 when the provider yields no point.
    pub fn mean_rate_khz(&mut self, run: RunNumber, validity: Validity) -> f64 {
        let provider = self.provider;
        let fetcher = self.fetchers.entry(run).or_insert_with(|| {
            let fetcher = provider.fetcher(run);
            if fetcher.is_none() {
                warn!("No rate information for run {}", run);
            }
            fetcher
        });
        let Some(fetcher) = fetcher else {
            return 0.0;
        };

        let mut sum = 0.0;
        let mut points = 0usize;
        let mut timestamp = validity.min;
        while timestamp < validity.max {
            if let Some(rate) = fetcher.rate_hz(timestamp) {
                sum += rate / 1000.0;
                points += 1;
            }
            timestamp = timestamp.saturating_add(self.step_ms);
        }

        if points == 0 {
            0.0
        } else {
            sum / points as f64
        }
    }
}

/// A deduplicated sample with its mean rate and interval assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedSample {
    pub sample: Sample,
    pub rate_khz: f64,
    /// `None` when the rate is outside every interval.
    pub interval: Option<usize>,
}

/// Classified samples grouped by run, each run sorted by rate.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedSamples {
    runs: BTreeMap<RunNumber, Vec<ClassifiedSample>>,
}

impl ClassifiedSamples {
    pub fn runs(&self) -> impl Iterator<Item = (RunNumber, &[ClassifiedSample])> {
        self.runs.iter().map(|(run, samples)| (*run, samples.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.runs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn unclassified_count(&self) -> usize {
        self.runs
            .values()
            .flatten()
            .filter(|s| s.interval.is_none())
            .count()
    }

    /// Classified samples per interval index, runs in ascending order and
    /// each run's samples in rate order.
    pub fn by_interval(&self) -> BTreeMap<usize, Vec<&ClassifiedSample>> {
        let mut grouped: BTreeMap<usize, Vec<&ClassifiedSample>> = BTreeMap::new();
        for sample in self.runs.values().flatten() {
            if let Some(index) = sample.interval {
                grouped.entry(index).or_default().push(sample);
            }
        }
        grouped
    }
}

/// Query the rate of every sample and place it in the interval table.
pub fn classify_samples(
    samples: SampleSet,
    table: &RateIntervalTable,
    rates: &mut RateCache<'_>,
) -> ClassifiedSamples {
    let mut runs: BTreeMap<RunNumber, Vec<ClassifiedSample>> = BTreeMap::new();

    for (run, run_samples) in samples.into_runs() {
        let mut classified: Vec<ClassifiedSample> = run_samples
            .into_iter()
            .map(|sample| {
                let rate_khz = rates.mean_rate_khz(run, sample.validity);
                let interval = table.classify(rate_khz);
                debug!(
                    "Sample {} has rate {:.2} kHz -> interval {:?}",
                    sample.label(),
                    rate_khz,
                    interval
                );
                ClassifiedSample {
                    sample,
                    rate_khz,
                    interval,
                }
            })
            .collect();

        // stable: equal rates keep validity order
        classified.sort_by(|a, b| a.rate_khz.total_cmp(&b.rate_khz));
        runs.insert(run, classified);
    }

    ClassifiedSamples { runs }
}
