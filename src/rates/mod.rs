//! Interaction-rate handling: the interval table, rate providers and the
//! sample classifier.

pub mod classifier;
pub mod intervals;
pub mod provider;

pub use classifier::{classify_samples, ClassifiedSample, ClassifiedSamples, RateCache};
pub use intervals::RateIntervalTable;
pub use provider::{RateProvider, ScalerTable};
