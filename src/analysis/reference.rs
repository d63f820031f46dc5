//! Per-interval denominators: reference-run sums or averaged fallbacks.

use crate::histogram::Histogram;
use crate::models::{DenominatorSource, RunNumber};
use crate::rates::{ClassifiedSample, RateIntervalTable};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Reference runs keyed by the highest rate (kHz) they cover, ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceRunMap {
    entries: Vec<(f64, RunNumber)>,
}

impl ReferenceRunMap {
    /// Build from `(rate threshold, run)` pairs. A repeated threshold keeps
    /// the last run given for it.
    pub fn new(entries: impl IntoIterator<Item = (f64, RunNumber)>) -> Self {
        let mut map: Vec<(f64, RunNumber)> = Vec::new();
        for (threshold, run) in entries {
            match map.iter_mut().find(|(t, _)| *t == threshold) {
                Some(existing) => existing.1 = run,
                None => map.push((threshold, run)),
            }
        }
        map.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { entries: map }
    }

    /// Run of the smallest threshold at or above `upper`.
    pub fn select(&self, upper: f64) -> Option<RunNumber> {
        self.entries
            .iter()
            .find(|(threshold, _)| upper <= *threshold)
            .map(|(_, run)| *run)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(f64, RunNumber)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The histogram samples of an interval are divided by.
#[derive(Debug, Clone, PartialEq)]
pub struct Denominator {
    pub source: DenominatorSource,
    /// Raw reference sum, or the average of normalized samples.
    pub histogram: Histogram,
}

impl Denominator {
    /// Run whose samples produced this denominator, if it is a reference.
    pub fn reference_run(&self) -> Option<RunNumber> {
        match self.source {
            DenominatorSource::Reference { run, .. } => Some(run),
            DenominatorSource::Average { .. } => None,
        }
    }
}

/// Sum all samples of `run` in the interval.
fn sum_reference(run: RunNumber, samples: &[&ClassifiedSample]) -> Option<Denominator> {
    let mut sum: Option<Histogram> = None;
    let mut count = 0usize;

    for sample in samples.iter().filter(|s| s.sample.run == run) {
        let histogram = &sample.sample.histogram;
        match sum.as_mut() {
            None => sum = Some(histogram.clone()),
            Some(total) => {
                if let Err(e) = total.add(histogram) {
                    warn!(
                        "Reference sample {} left out: {}",
                        sample.sample.label(),
                        e
                    );
                    continue;
                }
            }
        }
        count += 1;
    }

    sum.map(|histogram| Denominator {
        source: DenominatorSource::Reference {
            run,
            samples: count,
        },
        histogram,
    })
}

/// Unweighted average of all non-empty samples, each normalized first.
fn average_samples(
    samples: &[&ClassifiedSample],
    range_min: f64,
    range_max: f64,
) -> Option<Denominator> {
    let mut sum: Option<Histogram> = None;
    let mut count = 0usize;

    for sample in samples {
        let histogram = &sample.sample.histogram;
        if histogram.is_empty() {
            continue;
        }
        let normalized = histogram.normalized(range_min, range_max);
        match sum.as_mut() {
            None => sum = Some(normalized),
            Some(total) => {
                if let Err(e) = total.add(&normalized) {
                    warn!("Sample {} left out of average: {}", sample.sample.label(), e);
                    continue;
                }
            }
        }
        count += 1;
    }

    let mut histogram = sum?;
    histogram.scale(1.0 / count as f64);
    Some(Denominator {
        source: DenominatorSource::Average { samples: count },
        histogram,
    })
}

/// Denominator for one interval with upper bound `upper`.
///
/// Uses the mapped reference run when it has samples here, otherwise the
/// average of every sample in the interval. `None` when nothing is usable.
pub fn build_denominator(
    upper: f64,
    samples: &[&ClassifiedSample],
    references: &ReferenceRunMap,
    range_min: f64,
    range_max: f64,
) -> Option<Denominator> {
    if let Some(run) = references.select(upper) {
        if let Some(denominator) = sum_reference(run, samples) {
            return Some(denominator);
        }
        debug!("Reference run {} has no samples below {} kHz", run, upper);
    }
    average_samples(samples, range_min, range_max)
}

/// Build the denominators of every populated interval of a plot.
pub fn build_denominators(
    table: &RateIntervalTable,
    by_interval: &BTreeMap<usize, Vec<&ClassifiedSample>>,
    references: &ReferenceRunMap,
    range_min: f64,
    range_max: f64,
) -> BTreeMap<usize, Denominator> {
    let mut denominators = BTreeMap::new();

    for (index, samples) in by_interval {
        let Some(interval) = table.get(*index) else {
            continue;
        };
        match build_denominator(interval.upper, samples, references, range_min, range_max) {
            Some(denominator) => {
                debug!(
                    "Interval {} [{:.1}, {:.1}) kHz uses {}",
                    index, interval.lower, interval.upper, denominator.source
                );
                denominators.insert(*index, denominator);
            }
            None => info!(
                "No usable denominator for interval {} [{:.1}, {:.1}) kHz",
                index, interval.lower, interval.upper
            ),
        }
    }

    denominators
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::Axis;
    use crate::models::{Sample, Validity};

    fn classified(run: RunNumber, min: u64, values: &[f64]) -> ClassifiedSample {
        let axis = Axis::new(values.len(), 0.0, values.len() as f64).unwrap();
        ClassifiedSample {
            sample: Sample::new(
                run,
                Validity::new(min, min + 60_000),
                Histogram::with_counting_errors(axis, values.to_vec()).unwrap(),
            ),
            rate_khz: 30.0,
            interval: Some(0),
        }
    }

    fn example_map() -> ReferenceRunMap {
        ReferenceRunMap::new([(50.0, 400), (15.0, 100), (40.0, 300), (29.0, 200)])
    }

    #[test]
    fn test_select_smallest_threshold_above() {
        let map = example_map();
        assert_eq!(map.select(32.0), Some(300));
        assert_eq!(map.select(29.0), Some(200));
        assert_eq!(map.select(5.0), Some(100));
        assert_eq!(map.select(50.0), Some(400));
        assert_eq!(map.select(50.1), None);
        assert_eq!(ReferenceRunMap::default().select(1.0), None);
    }

    #[test]
    fn test_map_is_sorted_and_last_duplicate_wins() {
        let map = ReferenceRunMap::new([(29.0, 1), (15.0, 2), (29.0, 3)]);
        let entries: Vec<_> = map.iter().copied().collect();
        assert_eq!(entries, vec![(15.0, 2), (29.0, 3)]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_reference_samples_are_summed() {
        let a = classified(300, 0, &[2.0, 4.0]);
        let b = classified(300, 60_000, &[6.0, 8.0]);
        let other = classified(500, 0, &[100.0, 100.0]);
        let samples = vec![&a, &other, &b];

        let denominator =
            build_denominator(32.0, &samples, &example_map(), 0.0, 0.0).unwrap();
        assert_eq!(
            denominator.source,
            DenominatorSource::Reference { run: 300, samples: 2 }
        );
        assert_eq!(denominator.histogram.values, vec![8.0, 12.0]);
        assert_eq!(denominator.reference_run(), Some(300));
    }

    #[test]
    fn test_fallback_averages_normalized_samples() {
        let a = classified(500, 0, &[1.0, 3.0]);
        let b = classified(600, 0, &[30.0, 10.0]);
        let empty = classified(700, 0, &[0.0, 0.0]);
        let samples = vec![&a, &b, &empty];

        // reference run 300 has no sample here
        let denominator =
            build_denominator(32.0, &samples, &example_map(), 0.0, 0.0).unwrap();
        assert_eq!(denominator.source, DenominatorSource::Average { samples: 2 });
        assert_eq!(denominator.reference_run(), None);
        // (0.25 + 0.75) / 2, (0.75 + 0.25) / 2
        assert!((denominator.histogram.values[0] - 0.5).abs() < 1e-12);
        assert!((denominator.histogram.values[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_no_threshold_falls_back_to_average() {
        let a = classified(500, 0, &[1.0, 1.0]);
        let samples = vec![&a];
        let denominator =
            build_denominator(80.0, &samples, &example_map(), 0.0, 0.0).unwrap();
        assert_eq!(denominator.source, DenominatorSource::Average { samples: 1 });
    }

    #[test]
    fn test_nothing_usable() {
        let empty = classified(500, 0, &[0.0, 0.0]);
        assert!(build_denominator(80.0, &[&empty], &example_map(), 0.0, 0.0).is_none());
        assert!(build_denominator(80.0, &[], &example_map(), 0.0, 0.0).is_none());
    }

    #[test]
    fn test_build_denominators_per_interval() {
        let table = RateIntervalTable::generate(50.0, 5.0, 0.1);
        let index = table.classify(30.0).unwrap();
        let a = classified(300, 0, &[1.0, 1.0]);
        let mut by_interval = BTreeMap::new();
        by_interval.insert(index, vec![&a]);

        let denominators = build_denominators(&table, &by_interval, &example_map(), 0.0, 0.0);
        assert_eq!(denominators.len(), 1);
        // interval containing 30 kHz has an upper edge between 30 and 40
        assert_eq!(denominators[&index].reference_run(), Some(300));
    }
}
