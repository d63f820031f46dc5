//! A QC session: every configured plot and trend processed against one set
//! of sources and one rate provider.
//!
//! The session owns everything that lives for the whole run (interval table,
//! reference-run map, analysis policy and the per-run rate fetchers). Each
//! plot gets a fresh [`PlotContext`] that is dropped once the plot is done.

use crate::analysis::{
    aggregate_bad_intervals, analyze_interval, build_denominators, build_trend, CheckSettings,
    Denominator, ReferencePolicy, ReferenceRunMap,
};
use crate::config::{Config, PlotConfig, TrendConfig};
use crate::ingest::{collect_samples, HistogramStore};
use crate::models::{
    IntervalReport, PlotReport, ReportMetadata, SampleReport, SessionReport, TrendReport,
};
use crate::rates::{classify_samples, ClassifiedSamples, RateCache, RateIntervalTable, RateProvider};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-plot working state.
struct PlotContext<'c> {
    config: &'c PlotConfig,
    label: String,
    settings: CheckSettings,
    samples: ClassifiedSamples,
    denominators: BTreeMap<usize, Denominator>,
}

pub struct Session<'a> {
    config: &'a Config,
    stores: &'a [Box<dyn HistogramStore>],
    table: RateIntervalTable,
    references: ReferenceRunMap,
    policy: ReferencePolicy,
    rates: RateCache<'a>,
}

impl<'a> Session<'a> {
    pub fn new(
        config: &'a Config,
        stores: &'a [Box<dyn HistogramStore>],
        provider: &'a dyn RateProvider,
    ) -> Self {
        let table = RateIntervalTable::generate(config.rates.max, config.rates.min, config.rates.delta);
        info!(
            "{} rate intervals between {} and {} kHz",
            table.len(),
            config.rates.min,
            config.rates.max
        );

        Self {
            config,
            stores,
            table,
            references: config.reference_map(),
            policy: ReferencePolicy {
                exempt_reference_run: config.analysis.exempt_reference_run,
            },
            rates: RateCache::new(provider, config.session.rate_step_ms),
        }
    }

    fn load_plot<'c>(&mut self, plot: &'c PlotConfig) -> PlotContext<'c> {
        let key = plot.key();
        let settings = plot.check_settings();

        let set = collect_samples(self.stores, &key, plot.projection);
        debug!("{}: samples from runs {:?}", key, set.run_numbers());
        let samples = classify_samples(set, &self.table, &mut self.rates);
        let denominators = build_denominators(
            &self.table,
            &samples.by_interval(),
            &self.references,
            settings.range_min,
            settings.range_max,
        );

        PlotContext {
            config: plot,
            label: key.to_string(),
            settings,
            samples,
            denominators,
        }
    }

    /// Run the deviation check of one plot over all rate intervals.
    pub fn process_plot(&mut self, plot: &PlotConfig) -> PlotReport {
        let context = self.load_plot(plot);
        info!(
            "Checking {}: {} samples, {} unclassified",
            context.label,
            context.samples.len(),
            context.samples.unclassified_count()
        );

        let include_shapes = self.config.report.include_shapes;
        let mut intervals = Vec::new();
        let mut bad_intervals = Vec::new();

        for (index, samples) in context.samples.by_interval() {
            let Some(interval) = self.table.get(index) else {
                continue;
            };

            let Some(denominator) = context.denominators.get(&index) else {
                intervals.push(IntervalReport {
                    index,
                    rate_low: interval.lower,
                    rate_high: interval.upper,
                    denominator: None,
                    denominator_shape: None,
                    samples: Vec::new(),
                    unchecked: samples.len(),
                });
                continue;
            };

            let (outcomes, bad) = analyze_interval(
                &context.label,
                &samples,
                denominator,
                &context.settings,
                self.policy,
            );
            bad_intervals.extend(bad);

            let shape_of = |histogram: &crate::histogram::Histogram, normalize: bool| {
                if normalize {
                    histogram
                        .normalized(context.settings.range_min, context.settings.range_max)
                        .values
                } else {
                    histogram.values.clone()
                }
            };

            let reports: Vec<SampleReport> = outcomes
                .iter()
                .map(|outcome| SampleReport {
                    run: outcome.run,
                    validity: outcome.validity,
                    rate_khz: outcome.rate_khz,
                    frac_bad: outcome.check.frac_bad(),
                    checked_bins: outcome.check.checked,
                    bad_bins: outcome.check.bad,
                    verdict: outcome.verdict,
                    is_reference: outcome.is_reference,
                    shape: if include_shapes {
                        samples
                            .iter()
                            .find(|s| {
                                s.sample.run == outcome.run && s.sample.validity == outcome.validity
                            })
                            .map(|s| shape_of(&s.sample.histogram, context.config.normalize))
                    } else {
                        None
                    },
                })
                .collect();

            intervals.push(IntervalReport {
                index,
                rate_low: interval.lower,
                rate_high: interval.upper,
                denominator: Some(denominator.source.clone()),
                denominator_shape: include_shapes.then(|| shape_of(&denominator.histogram, true)),
                unchecked: samples.len() - reports.len(),
                samples: reports,
            });
        }

        if bad_intervals.is_empty() {
            debug!("No bad intervals for {}", context.label);
        }

        PlotReport {
            plot: context.label,
            samples_loaded: context.samples.len(),
            samples_unclassified: context.samples.unclassified_count(),
            intervals,
            bad_intervals,
        }
    }

    /// Mean-versus-rate trend of one quantity.
    pub fn process_trend(&mut self, trend: &TrendConfig) -> TrendReport {
        let key = trend.key();
        let set = collect_samples(self.stores, &key, trend.projection);
        let samples = classify_samples(set, &self.table, &mut self.rates);
        build_trend(&key.to_string(), &samples)
    }

    /// Process every configured plot, then every trend.
    pub fn run(mut self, show_progress: bool) -> SessionReport {
        let start_time = Instant::now();
        let config = self.config;

        let progress = if show_progress {
            let pb = ProgressBar::new((config.plots.len() + config.trends.len()) as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        let mut plots = Vec::with_capacity(config.plots.len());
        for plot in &config.plots {
            if let Some(ref pb) = progress {
                pb.set_message(plot.key().to_string());
            }
            plots.push(self.process_plot(plot));
            if let Some(ref pb) = progress {
                pb.inc(1);
            }
        }

        let mut trends = Vec::with_capacity(config.trends.len());
        for trend in &config.trends {
            if let Some(ref pb) = progress {
                pb.set_message(trend.key().to_string());
            }
            trends.push(self.process_trend(trend));
            if let Some(ref pb) = progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        let all_bad: Vec<_> = plots
            .iter()
            .flat_map(|p| p.bad_intervals.iter().cloned())
            .collect();
        let bad_time_ranges: Vec<_> = aggregate_bad_intervals(&all_bad).into_iter().collect();

        if self.table.is_empty() {
            warn!("Rate interval table is empty, no sample was checked");
        }
        debug!("Rate fetchers set up for {} runs", self.rates.runs_seen());

        let metadata = ReportMetadata {
            session_id: config.session.id.clone(),
            analysis_date: Utc::now(),
            sources: self.stores.len(),
            plots_checked: plots.len(),
            rate_intervals: self.table.len(),
            duration_seconds: start_time.elapsed().as_secs_f64(),
        };

        SessionReport {
            metadata,
            plots,
            trends,
            bad_time_ranges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReferenceRunConfig;
    use crate::histogram::{Axis, Projection, RawHistogram};
    use crate::ingest::{FileHistogramStore, RawSample};
    use crate::models::{
        AggregatedInterval, DenominatorSource, PlotKey, RunNumber, TrendPoint, Validity, Verdict,
    };
    use crate::scanner::{ScanConfig, SourceScanner};
    use std::path::Path;
    use crate::rates::provider::{RunRateFetcher, ScalerSeries};
    use crate::rates::ScalerTable;
    use std::cell::Cell;

    struct CountingProvider {
        inner: ScalerTable,
        setups: Cell<usize>,
    }

    impl RateProvider for CountingProvider {
        fn fetcher(&self, run: RunNumber) -> Option<Box<dyn RunRateFetcher>> {
            self.setups.set(self.setups.get() + 1);
            self.inner.fetcher(run)
        }
    }

    struct MemoryStore {
        samples: Vec<(PlotKey, RawSample)>,
    }

    impl HistogramStore for MemoryStore {
        fn name(&self) -> &str {
            "memory"
        }

        fn fetch(&self, key: &PlotKey) -> Vec<RawSample> {
            self.samples
                .iter()
                .filter(|(k, _)| k == key)
                .map(|(_, s)| s.clone())
                .collect()
        }
    }

    fn key() -> PlotKey {
        PlotKey::new("TPC", "Tracks", "hEta")
    }

    fn raw(run: RunNumber, min: u64, values: Vec<f64>) -> (PlotKey, RawSample) {
        (
            key(),
            RawSample {
                run,
                validity: Validity::new(min, min + 60_000),
                histogram: RawHistogram::Histogram1D {
                    axis: Axis::new(values.len(), 0.0, values.len() as f64).unwrap(),
                    values,
                    errors: None,
                },
            },
        )
    }

    fn plot_config() -> PlotConfig {
        PlotConfig {
            detector: "TPC".to_string(),
            task: "Tracks".to_string(),
            name: "hEta".to_string(),
            check_range_min: 0.0,
            check_range_max: 0.0,
            check_threshold: 0.1,
            check_deviation_nsigma: 2.0,
            max_bad_bins_frac: 0.1,
            normalize: true,
            projection: Projection::X,
        }
    }

    fn scalers() -> ScalerTable {
        let mut table = ScalerTable::default();
        for run in [100, 200, 300] {
            table.insert(run, ScalerSeries::new(vec![(0, 30_000.0), (1_000_000, 30_000.0)]));
        }
        table
    }

    fn stores() -> Vec<Box<dyn HistogramStore>> {
        vec![
            Box::new(MemoryStore {
                samples: vec![
                    raw(300, 0, vec![5000.0; 4]),
                    raw(100, 0, vec![1000.0; 4]),
                    raw(200, 0, vec![4000.0, 1000.0, 1000.0, 1000.0]),
                    raw(200, 60_000, vec![4000.0, 1000.0, 1000.0, 1000.0]),
                    raw(200, 200_000, vec![1000.0; 4]),
                ],
            }),
            // second file repeating one window of run 100
            Box::new(MemoryStore {
                samples: vec![raw(100, 0, vec![1000.0; 4])],
            }),
        ]
    }

    fn config() -> Config {
        Config {
            reference_runs: vec![ReferenceRunConfig {
                number: 300,
                rate_max: 40.0,
            }],
            plots: vec![plot_config()],
            trends: vec![TrendConfig {
                detector: "TPC".to_string(),
                task: "Tracks".to_string(),
                name: "hEta".to_string(),
                projection: Projection::X,
            }],
            ..Config::default()
        }
    }

    #[test]
    fn test_process_plot_flags_deviating_windows() {
        let config = config();
        let stores = stores();
        let provider = scalers();
        let mut session = Session::new(&config, &stores, &provider);

        let report = session.process_plot(&config.plots[0]);
        assert_eq!(report.plot, "TPC/Tracks/hEta");
        // the repeated run 100 window is merged
        assert_eq!(report.samples_loaded, 5);
        assert_eq!(report.samples_unclassified, 0);
        assert_eq!(report.intervals.len(), 1);

        let interval = &report.intervals[0];
        assert_eq!(
            interval.denominator,
            Some(DenominatorSource::Reference { run: 300, samples: 1 })
        );
        assert_eq!(interval.samples.len(), 5);
        assert_eq!(interval.unchecked, 0);
        assert_eq!(interval.bad_count(), 2);
        assert!(interval.samples.iter().all(|s| s.shape.is_none()));

        let reference = interval.samples.iter().find(|s| s.run == 300).unwrap();
        assert!(reference.is_reference);
        assert_eq!(reference.verdict, Verdict::Good);

        let bad: Vec<_> = report.bad_intervals.iter().map(|b| (b.run, b.validity.min)).collect();
        assert_eq!(bad, vec![(200, 0), (200, 60_000)]);
    }

    #[test]
    fn test_run_aggregates_bad_ranges() {
        let config = config();
        let stores = stores();
        let provider = scalers();
        let session = Session::new(&config, &stores, &provider);

        let report = session.run(false);
        assert_eq!(report.metadata.sources, 2);
        assert_eq!(report.metadata.plots_checked, 1);
        assert_eq!(
            report.metadata.rate_intervals,
            RateIntervalTable::generate(50.0, 5.0, 0.1).len()
        );
        assert_eq!(
            report.bad_time_ranges,
            vec![(200, vec![AggregatedInterval { run: 200, start: 0, end: 120_000 }])]
        );
        assert_eq!(report.total_bad_ranges(), 1);

        assert_eq!(report.trends.len(), 1);
        assert_eq!(report.trends[0].runs.len(), 3);
    }

    #[test]
    fn test_shapes_are_exported_on_request() {
        let mut config = config();
        config.report.include_shapes = true;
        let stores = stores();
        let provider = scalers();
        let mut session = Session::new(&config, &stores, &provider);

        let report = session.process_plot(&config.plots[0]);
        let interval = &report.intervals[0];
        assert_eq!(interval.denominator_shape, Some(vec![0.25; 4]));
        let good = interval.samples.iter().find(|s| s.run == 100).unwrap();
        assert_eq!(good.shape, Some(vec![0.25; 4]));
    }

    #[test]
    fn test_references_do_not_leak_between_plots() {
        let phi = PlotKey::new("TPC", "Tracks", "hPhi");
        let peaked = vec![4000.0, 1000.0, 1000.0, 1000.0];
        let with_key = |key: &PlotKey, (_, sample): (PlotKey, RawSample)| (key.clone(), sample);

        let stores: Vec<Box<dyn HistogramStore>> = vec![Box::new(MemoryStore {
            samples: vec![
                raw(300, 0, vec![1000.0; 4]),
                raw(100, 0, vec![1000.0; 4]),
                with_key(&phi, raw(300, 0, peaked.clone())),
                with_key(&phi, raw(100, 0, peaked)),
            ],
        })];
        let provider = CountingProvider {
            inner: scalers(),
            setups: Cell::new(0),
        };

        let mut phi_plot = plot_config();
        phi_plot.name = "hPhi".to_string();
        let mut config = config();
        config.plots = vec![plot_config(), phi_plot];
        config.report.include_shapes = true;
        let mut session = Session::new(&config, &stores, &provider);

        let eta = session.process_plot(&config.plots[0]);
        let phi_report = session.process_plot(&config.plots[1]);

        assert_eq!(eta.intervals[0].denominator_shape, Some(vec![0.25; 4]));

        // same run and interval, but the denominator comes from hPhi alone
        let interval = &phi_report.intervals[0];
        assert_eq!(
            interval.denominator,
            Some(DenominatorSource::Reference { run: 300, samples: 1 })
        );
        let shape = interval.denominator_shape.as_ref().unwrap();
        let expected = [4.0 / 7.0, 1.0 / 7.0, 1.0 / 7.0, 1.0 / 7.0];
        for (got, want) in shape.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{} != {}", got, want);
        }
        assert!(phi_report.bad_intervals.is_empty());
        assert_eq!(interval.bad_count(), 0);

        // rate fetchers are shared across plots
        assert_eq!(session.rates.runs_seen(), 2);
        assert_eq!(provider.setups.get(), 2);
    }

    #[test]
    fn test_missing_plot_gives_empty_report() {
        let config = config();
        let stores = stores();
        let provider = scalers();
        let mut session = Session::new(&config, &stores, &provider);

        let mut other = plot_config();
        other.name = "absent".to_string();
        let report = session.process_plot(&other);
        assert_eq!(report.samples_loaded, 0);
        assert!(report.intervals.is_empty());
        assert!(report.bad_intervals.is_empty());
    }

    #[test]
    fn test_session_from_fixture_files() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures");
        let sources = SourceScanner::new(ScanConfig::default())
            .scan(&[root.join("sources")])
            .unwrap();
        assert_eq!(sources.len(), 2);

        let stores: Vec<Box<dyn HistogramStore>> = sources
            .iter()
            .map(|s| Box::new(FileHistogramStore::open(&s.path).unwrap()) as Box<dyn HistogramStore>)
            .collect();
        let scalers = ScalerTable::load(&root.join("scalers.json")).unwrap();

        let config = Config {
            reference_runs: vec![ReferenceRunConfig {
                number: 300,
                rate_max: 40.0,
            }],
            plots: vec![plot_config()],
            trends: vec![TrendConfig {
                detector: "ITS".to_string(),
                task: "Clusters".to_string(),
                name: "ROFSize".to_string(),
                projection: Projection::Y,
            }],
            ..Config::default()
        };

        let report = Session::new(&config, &stores, &scalers).run(false);
        assert_eq!(report.plots[0].samples_loaded, 4);
        assert_eq!(
            report.bad_time_ranges,
            vec![(200, vec![AggregatedInterval { run: 200, start: 0, end: 120_000 }])]
        );
        // projected onto y: [4, 0]
        assert_eq!(
            report.trends[0].runs,
            vec![(200, vec![TrendPoint { rate_khz: 30.0, mean: 0.5 }])]
        );
    }
}
