//! Mean-versus-rate trends.

use crate::models::{TrendPoint, TrendReport};
use crate::rates::ClassifiedSamples;
use tracing::debug;

/// Histogram mean against sample rate, one series per run in rate order.
///
/// Samples outside the interval table still contribute; an empty histogram
/// has mean 0.
pub fn build_trend(plot: &str, samples: &ClassifiedSamples) -> TrendReport {
    let runs: Vec<_> = samples
        .runs()
        .map(|(run, run_samples)| {
            let points: Vec<TrendPoint> = run_samples
                .iter()
                .map(|s| TrendPoint {
                    rate_khz: s.rate_khz,
                    mean: s.sample.histogram.mean(),
                })
                .collect();
            (run, points)
        })
        .collect();

    debug!("Trend of {} covers {} runs", plot, runs.len());

    TrendReport {
        plot: plot.to_string(),
        runs,
    }
}
