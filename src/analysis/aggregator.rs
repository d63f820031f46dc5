//! Bad-interval aggregation and statistics.
//!
//! Flagged validity windows are merged in two passes: first per run and
//! plot, then per run across all plots, giving the final disjoint set of bad
//! time ranges of each run.

use crate::models::{AggregatedInterval, BadInterval, RunNumber};
use std::collections::BTreeMap;

/// Merge spans of one plot: sorted by start, a span starting at or before
/// the current end extends it.
pub fn merge_plot_spans(mut spans: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    spans.sort();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(spans.len());

    for (start, end) in spans {
        match merged.last_mut() {
            Some(current) if start <= current.1 => {
                if end > current.1 {
                    current.1 = end;
                }
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Merge spans of one run coming from several plots, using inclusive
/// overlap.
pub fn merge_run_spans(mut spans: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    spans.sort();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(spans.len());

    for (start, end) in spans {
        match merged.last_mut() {
            Some(current) if start <= current.1 && end >= current.0 => {
                current.0 = current.0.min(start);
                current.1 = current.1.max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Group bad intervals by run, then by plot.
pub fn group_by_run_and_plot(
    bad_intervals: &[BadInterval],
) -> BTreeMap<RunNumber, BTreeMap<&str, Vec<(u64, u64)>>> {
    let mut grouped: BTreeMap<RunNumber, BTreeMap<&str, Vec<(u64, u64)>>> = BTreeMap::new();

    for bad in bad_intervals {
        grouped
            .entry(bad.run)
            .or_default()
            .entry(bad.plot.as_str())
            .or_default()
            .push((bad.validity.min, bad.validity.max));
    }

    grouped
}

/// Final disjoint bad time ranges per run.
pub fn aggregate_bad_intervals(
    bad_intervals: &[BadInterval],
) -> BTreeMap<RunNumber, Vec<AggregatedInterval>> {
    let mut result = BTreeMap::new();

    for (run, plots) in group_by_run_and_plot(bad_intervals) {
        let per_plot: Vec<(u64, u64)> = plots
            .into_values()
            .flat_map(merge_plot_spans)
            .collect();

        let spans = merge_run_spans(per_plot)
            .into_iter()
            .map(|(start, end)| AggregatedInterval { run, start, end })
            .collect();
        result.insert(run, spans);
    }

    result
}

/// Number of distinct plots that flagged each run.
pub fn plots_per_run(bad_intervals: &[BadInterval]) -> BTreeMap<RunNumber, usize> {
    group_by_run_and_plot(bad_intervals)
        .into_iter()
        .map(|(run, plots)| (run, plots.len()))
        .collect()
}

/// Runs with the longest total bad time, longest first.
pub fn most_affected_runs(
    ranges: &[(RunNumber, Vec<AggregatedInterval>)],
    n: usize,
) -> Vec<(RunNumber, u64)> {
    let mut totals: Vec<(RunNumber, u64)> = ranges
        .iter()
        .map(|(run, spans)| (*run, spans.iter().map(|s| s.duration_ms()).sum()))
        .filter(|(_, total)| *total > 0)
        .collect();

    totals.sort_by_key(|(run, total)| (std::cmp::Reverse(*total), *run));
    totals.truncate(n);
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Validity;

    fn bad(run: RunNumber, plot: &str, min: u64, max: u64) -> BadInterval {
        BadInterval {
            run,
            plot: plot.to_string(),
            validity: Validity::new(min, max),
        }
    }

    #[test]
    fn test_merge_plot_spans() {
        let merged = merge_plot_spans(vec![(400, 500), (150, 300), (100, 200)]);
        assert_eq!(merged, vec![(100, 300), (400, 500)]);
    }

    #[test]
    fn test_merge_plot_spans_touching_and_contained() {
        assert_eq!(
            merge_plot_spans(vec![(100, 200), (200, 250), (210, 220)]),
            vec![(100, 250)]
        );
        assert_eq!(merge_plot_spans(vec![(100, 200), (201, 250)]).len(), 2);
        assert!(merge_plot_spans(Vec::new()).is_empty());
    }

    #[test]
    fn test_merge_run_spans() {
        assert_eq!(
            merge_run_spans(vec![(100, 200), (150, 300), (400, 500)]),
            vec![(100, 300), (400, 500)]
        );
        assert_eq!(
            merge_run_spans(vec![(300, 400), (100, 300)]),
            vec![(100, 400)]
        );
    }

    #[test]
    fn test_aggregate_across_plots() {
        let records = vec![
            bad(7, "TPC/Tracks/hEta", 100, 200),
            bad(7, "TPC/Tracks/hEta", 150, 300),
            bad(7, "ITS/Tracks/EtaDistribution", 250, 350),
            bad(7, "ITS/Tracks/EtaDistribution", 400, 500),
            bad(9, "TPC/Tracks/hEta", 10, 20),
        ];

        let aggregated = aggregate_bad_intervals(&records);
        assert_eq!(aggregated.len(), 2);

        let run7: Vec<_> = aggregated[&7].iter().map(|a| (a.start, a.end)).collect();
        assert_eq!(run7, vec![(100, 350), (400, 500)]);
        assert_eq!(aggregated[&9][0], AggregatedInterval { run: 9, start: 10, end: 20 });

        // disjoint and ordered
        for pair in aggregated[&7].windows(2) {
            assert!(pair[0].end < pair[1].start);
        }
    }

    #[test]
    fn test_plots_per_run() {
        let records = vec![
            bad(7, "a", 0, 1),
            bad(7, "a", 5, 6),
            bad(7, "b", 0, 1),
            bad(8, "a", 0, 1),
        ];
        let counts = plots_per_run(&records);
        assert_eq!(counts[&7], 2);
        assert_eq!(counts[&8], 1);
    }

    #[test]
    fn test_most_affected_runs() {
        let ranges = vec![
            (7, vec![AggregatedInterval { run: 7, start: 0, end: 100 }]),
            (
                8,
                vec![
                    AggregatedInterval { run: 8, start: 0, end: 100 },
                    AggregatedInterval { run: 8, start: 200, end: 300 },
                ],
            ),
            (9, vec![AggregatedInterval { run: 9, start: 5, end: 5 }]),
        ];
        let top = most_affected_runs(&ranges, 5);
        assert_eq!(top, vec![(8, 200), (7, 100)]);
        assert_eq!(most_affected_runs(&ranges, 1), vec![(8, 200)]);
    }
}
