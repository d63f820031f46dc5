//! Minimal binned histogram arithmetic.
//!
//! The QC engine only needs a handful of operations on one-dimensional
//! histograms: bin-wise add and divide, integrals over a sub-range, scaling
//! and the content-weighted mean. Profiles and 2D histograms are accepted at
//! ingestion and reduced to a [`Histogram`] once, through [`RawHistogram::reduce`].

use crate::error::HistogramError;
use serde::{Deserialize, Serialize};

/// A uniform binning along one axis. Under/overflow bins are not kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub n_bins: usize,
    pub x_min: f64,
    pub x_max: f64,
}

impl Axis {
    pub fn new(n_bins: usize, x_min: f64, x_max: f64) -> Result<Self, HistogramError> {
        let axis = Self {
            n_bins,
            x_min,
            x_max,
        };
        axis.validate()?;
        Ok(axis)
    }

    fn validate(&self) -> Result<(), HistogramError> {
        if self.n_bins == 0 || !(self.x_min < self.x_max) {
            return Err(HistogramError::InvalidAxis);
        }
        Ok(())
    }

    pub fn bin_width(&self) -> f64 {
        (self.x_max - self.x_min) / self.n_bins as f64
    }

    /// Centre of the bin with zero-based index `bin`.
    pub fn bin_center(&self, bin: usize) -> f64 {
        self.x_min + (bin as f64 + 0.5) * self.bin_width()
    }

    /// Index of the bin containing `x`, clamped to the first/last bin.
    pub fn find_bin(&self, x: f64) -> usize {
        if x <= self.x_min {
            return 0;
        }
        let bin = ((x - self.x_min) / self.bin_width()).floor() as usize;
        bin.min(self.n_bins - 1)
    }

    /// Inclusive bin range covering `[min, max]`; the full axis when `min == max`.
    pub fn bin_range(&self, min: f64, max: f64) -> (usize, usize) {
        if min == max {
            (0, self.n_bins - 1)
        } else {
            (self.find_bin(min), self.find_bin(max))
        }
    }

    /// Whether the bin centre lies inside `[min, max]`; always true when `min == max`.
    pub fn center_in_range(&self, bin: usize, min: f64, max: f64) -> bool {
        if min == max {
            return true;
        }
        let center = self.bin_center(bin);
        center >= min && center <= max
    }
}

/// A one-dimensional histogram with per-bin errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub axis: Axis,
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
}

impl Histogram {
    pub fn new(axis: Axis, values: Vec<f64>, errors: Vec<f64>) -> Result<Self, HistogramError> {
        axis.validate()?;
        for len in [values.len(), errors.len()] {
            if len != axis.n_bins {
                return Err(HistogramError::LengthMismatch {
                    expected: axis.n_bins,
                    found: len,
                });
            }
        }
        Ok(Self {
            axis,
            values,
            errors,
        })
    }

    /// Build a counting histogram, errors taken as `sqrt(|value|)`.
    pub fn with_counting_errors(axis: Axis, values: Vec<f64>) -> Result<Self, HistogramError> {
        let errors = values.iter().map(|v| v.abs().sqrt()).collect();
        Self::new(axis, values, errors)
    }

    pub fn n_bins(&self) -> usize {
        self.axis.n_bins
    }

    pub fn same_binning(&self, other: &Histogram) -> bool {
        self.axis == other.axis
    }

    fn check_binning(&self, other: &Histogram) -> Result<(), HistogramError> {
        if self.same_binning(other) {
            return Ok(());
        }
        Err(HistogramError::BinningMismatch {
            left: self.axis.n_bins,
            left_min: self.axis.x_min,
            left_max: self.axis.x_max,
            right: other.axis.n_bins,
            right_min: other.axis.x_min,
            right_max: other.axis.x_max,
        })
    }

    /// Bin-wise sum. Errors are combined in quadrature, so the operation is
    /// commutative in both values and errors.
    pub fn add(&mut self, other: &Histogram) -> Result<(), HistogramError> {
        self.check_binning(other)?;
        for (v, o) in self.values.iter_mut().zip(&other.values) {
            *v += o;
        }
        for (e, o) in self.errors.iter_mut().zip(&other.errors) {
            *e = e.hypot(*o);
        }
        Ok(())
    }

    /// Sum of all bin contents.
    pub fn integral(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Sum of the bin contents between the bins containing `min` and `max`,
    /// or the full integral when `min == max`.
    pub fn integral_in(&self, min: f64, max: f64) -> f64 {
        let (first, last) = self.axis.bin_range(min, max);
        if first > last {
            return 0.0;
        }
        self.values[first..=last].iter().sum()
    }

    pub fn scale(&mut self, factor: f64) {
        for v in &mut self.values {
            *v *= factor;
        }
        for e in &mut self.errors {
            *e *= factor.abs();
        }
    }

    /// Factor that brings the integral over `[min, max]` to one.
    ///
    /// A zero integral yields the neutral factor 1.
    pub fn normalization_factor(&self, min: f64, max: f64) -> f64 {
        let integral = self.integral_in(min, max);
        if integral == 0.0 {
            1.0
        } else {
            1.0 / integral
        }
    }

    /// Copy scaled to unit integral over `[min, max]`.
    pub fn normalized(&self, min: f64, max: f64) -> Histogram {
        let mut copy = self.clone();
        copy.scale(self.normalization_factor(min, max));
        copy
    }

    /// Content-weighted mean of the bin centres, 0 for an empty histogram.
    pub fn mean(&self) -> f64 {
        let total = self.integral();
        if total == 0.0 {
            return 0.0;
        }
        let weighted: f64 = self
            .values
            .iter()
            .enumerate()
            .map(|(bin, v)| v * self.axis.bin_center(bin))
            .sum();
        weighted / total
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }
}

/// Which axis a 2D histogram is projected onto at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    #[default]
    X,
    Y,
}

/// Histogram payloads as they come out of a source, before reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RawHistogram {
    /// Plain 1D histogram. Missing errors default to counting errors.
    #[serde(rename = "histogram_1d")]
    Histogram1D {
        axis: Axis,
        values: Vec<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        errors: Option<Vec<f64>>,
    },
    /// Profile: per-bin sums of weights, weight * y and weight * y^2.
    #[serde(rename = "profile")]
    Profile {
        axis: Axis,
        sum_w: Vec<f64>,
        sum_wy: Vec<f64>,
        sum_wy2: Vec<f64>,
    },
    /// 2D histogram, values stored row-major with `y` as the slow index.
    #[serde(rename = "histogram_2d")]
    Histogram2D {
        x_axis: Axis,
        y_axis: Axis,
        values: Vec<f64>,
    },
}

impl RawHistogram {
    pub fn kind_name(&self) -> &'static str {
        match self {
            RawHistogram::Histogram1D { .. } => "histogram_1d",
            RawHistogram::Profile { .. } => "profile",
            RawHistogram::Histogram2D { .. } => "histogram_2d",
        }
    }

    /// Reduce to a 1D histogram: identity, profile-to-mean, or axis projection.
    pub fn reduce(&self, projection: Projection) -> Result<Histogram, HistogramError> {
        match self {
            RawHistogram::Histogram1D {
                axis,
                values,
                errors,
            } => match errors {
                Some(errors) => Histogram::new(*axis, values.clone(), errors.clone()),
                None => Histogram::with_counting_errors(*axis, values.clone()),
            },
            RawHistogram::Profile {
                axis,
                sum_w,
                sum_wy,
                sum_wy2,
            } => reduce_profile(*axis, sum_w, sum_wy, sum_wy2),
            RawHistogram::Histogram2D {
                x_axis,
                y_axis,
                values,
            } => project(*x_axis, *y_axis, values, projection),
        }
    }
}

fn reduce_profile(
    axis: Axis,
    sum_w: &[f64],
    sum_wy: &[f64],
    sum_wy2: &[f64],
) -> Result<Histogram, HistogramError> {
    for len in [sum_w.len(), sum_wy.len(), sum_wy2.len()] {
        if len != axis.n_bins {
            return Err(HistogramError::LengthMismatch {
                expected: axis.n_bins,
                found: len,
            });
        }
    }

    let mut values = Vec::with_capacity(axis.n_bins);
    let mut errors = Vec::with_capacity(axis.n_bins);
    for bin in 0..axis.n_bins {
        let w = sum_w[bin];
        if w <= 0.0 {
            values.push(0.0);
            errors.push(0.0);
            continue;
        }
        let mean = sum_wy[bin] / w;
        let variance = (sum_wy2[bin] / w - mean * mean).max(0.0);
        values.push(mean);
        // error on the mean
        errors.push((variance / w).sqrt());
    }
    Histogram::new(axis, values, errors)
}

fn project(
    x_axis: Axis,
    y_axis: Axis,
    values: &[f64],
    projection: Projection,
) -> Result<Histogram, HistogramError> {
    x_axis.validate()?;
    y_axis.validate()?;
    let expected = x_axis
        .n_bins
        .checked_mul(y_axis.n_bins)
        .ok_or(HistogramError::InvalidAxis)?;
    if values.len() != expected {
        return Err(HistogramError::LengthMismatch {
            expected,
            found: values.len(),
        });
    }

    let target = match projection {
        Projection::X => x_axis,
        Projection::Y => y_axis,
    };
    let mut projected = vec![0.0; target.n_bins];
    for iy in 0..y_axis.n_bins {
        for ix in 0..x_axis.n_bins {
            let v = values[iy * x_axis.n_bins + ix];
            match projection {
                Projection::X => projected[ix] += v,
                Projection::Y => projected[iy] += v,
            }
        }
    }
    Histogram::with_counting_errors(target, projected)
}
