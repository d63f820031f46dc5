//! Analysis stages run on the classified samples of one plot.
//!
//! Denominators are built per rate interval, every sample is checked
//! against its interval's denominator, and the flagged windows of all plots
//! are finally merged into disjoint bad time ranges per run.

pub mod aggregator;
pub mod deviation;
pub mod reference;
pub mod trend;

pub use aggregator::{aggregate_bad_intervals, most_affected_runs, plots_per_run};
pub use deviation::{analyze_interval, CheckSettings, ReferencePolicy};
pub use reference::{build_denominators, Denominator, ReferenceRunMap};
pub use trend::build_trend;
