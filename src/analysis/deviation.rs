//! Bin-wise comparison of samples against their interval's denominator.
//!
//! Both histograms are normalized to unit integral over the check range, the
//! sample is divided by the denominator and every checked bin is compared to
//! `1 ± (threshold + nsigma * ratio_error)`.
//!
//! The ratio error uses the independent-errors propagation
//! `sigma_r^2 = (e_n / d)^2 + (n * e_d / d^2)^2`, identical to
//! `r * sqrt((e_n/n)^2 + (e_d/d)^2)` for non-zero contents and still defined
//! when the numerator is zero. A zero denominator bin gives ratio 0 with
//! error 0.

use super::reference::Denominator;
use crate::error::HistogramError;
use crate::histogram::Histogram;
use crate::models::{BadInterval, RunNumber, Validity, Verdict};
use crate::rates::ClassifiedSample;
use tracing::{info, warn};

/// Deviation check settings of one plot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckSettings {
    pub range_min: f64,
    pub range_max: f64,
    pub threshold: f64,
    pub deviation_nsigma: f64,
    pub max_bad_bins_frac: f64,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            range_min: 0.0,
            range_max: 0.0,
            threshold: 0.1,
            deviation_nsigma: 2.0,
            max_bad_bins_frac: 0.1,
        }
    }
}

/// Bin counts of one comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinCheck {
    pub checked: usize,
    pub bad: usize,
}

impl BinCheck {
    /// Fraction of checked bins that are bad, 0 when nothing was checked.
    pub fn frac_bad(&self) -> f64 {
        if self.checked == 0 {
            0.0
        } else {
            self.bad as f64 / self.checked as f64
        }
    }
}

/// Ratio `n / d` and its propagated error.
pub fn ratio_with_error(n: f64, e_n: f64, d: f64, e_d: f64) -> (f64, f64) {
    if d == 0.0 {
        return (0.0, 0.0);
    }
    let ratio = n / d;
    let error = (e_n / d).hypot(n * e_d / (d * d));
    (ratio, error)
}

/// Compare a sample against a denominator, both normalized here.
pub fn check_bins(
    sample: &Histogram,
    denominator: &Histogram,
    settings: &CheckSettings,
) -> Result<BinCheck, HistogramError> {
    if !sample.same_binning(denominator) {
        return Err(HistogramError::BinningMismatch {
            left: sample.axis.n_bins,
            left_min: sample.axis.x_min,
            left_max: sample.axis.x_max,
            right: denominator.axis.n_bins,
            right_min: denominator.axis.x_min,
            right_max: denominator.axis.x_max,
        });
    }

    let numerator = sample.normalized(settings.range_min, settings.range_max);
    let denominator = denominator.normalized(settings.range_min, settings.range_max);

    let mut check = BinCheck::default();
    for bin in 0..numerator.n_bins() {
        if !numerator
            .axis
            .center_in_range(bin, settings.range_min, settings.range_max)
        {
            continue;
        }

        let (ratio, error) = ratio_with_error(
            numerator.values[bin],
            numerator.errors[bin],
            denominator.values[bin],
            denominator.errors[bin],
        );
        let deviation = (ratio - 1.0).abs();
        let allowed = settings.threshold + settings.deviation_nsigma * error;

        check.checked += 1;
        if deviation > allowed {
            check.bad += 1;
        }
    }
    Ok(check)
}

/// Whether samples of the reference run may be flagged against the
/// reference built from themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferencePolicy {
    pub exempt_reference_run: bool,
}

/// Result of checking one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub run: RunNumber,
    pub validity: Validity,
    pub rate_khz: f64,
    pub check: BinCheck,
    pub verdict: Verdict,
    pub is_reference: bool,
}

/// Check every sample of an interval against its denominator.
///
/// Samples whose binning differs from the denominator are left out.
pub fn analyze_interval(
    plot: &str,
    samples: &[&ClassifiedSample],
    denominator: &Denominator,
    settings: &CheckSettings,
    policy: ReferencePolicy,
) -> (Vec<SampleOutcome>, Vec<BadInterval>) {
    let reference_run = denominator.reference_run();
    let mut outcomes = Vec::with_capacity(samples.len());
    let mut bad_intervals = Vec::new();

    for classified in samples {
        let sample = &classified.sample;
        let check = match check_bins(&sample.histogram, &denominator.histogram, settings) {
            Ok(check) => check,
            Err(e) => {
                warn!("Cannot compare {} of {}: {}", sample.label(), plot, e);
                continue;
            }
        };

        let is_reference = reference_run == Some(sample.run);
        let frac_bad = check.frac_bad();
        let exceeds = frac_bad > settings.max_bad_bins_frac;
        let verdict = if exceeds && !(is_reference && policy.exempt_reference_run) {
            Verdict::Bad
        } else {
            Verdict::Good
        };

        if verdict == Verdict::Bad {
            info!(
                "Bad time interval for plot \"{}\": {} ({:.0}% bad bins)",
                plot,
                sample.label(),
                frac_bad * 100.0
            );
            bad_intervals.push(BadInterval {
                run: sample.run,
                plot: plot.to_string(),
                validity: sample.validity,
            });
        }

        outcomes.push(SampleOutcome {
            run: sample.run,
            validity: sample.validity,
            rate_khz: classified.rate_khz,
            check,
            verdict,
            is_reference,
        });
    }

    (outcomes, bad_intervals)
}
