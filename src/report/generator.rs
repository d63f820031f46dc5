//! Markdown and JSON report generation.
//!
//! This module renders a [`SessionReport`] as a Markdown document for
//! shift crews, or as pretty-printed JSON for downstream tooling.

use crate::analysis::{most_affected_runs, plots_per_run};
use crate::config::ReportConfig;
use crate::models::{
    format_hms, IntervalReport, PlotReport, ReportMetadata, SampleReport, SessionReport,
    TrendReport, Verdict,
};
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &SessionReport, options: &ReportConfig) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# Rate-Binned QC Report\n\n");

    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_table_of_contents(report));
    output.push_str(&generate_summary_section(report, options.top_runs));
    output.push_str(&generate_bad_ranges_section(report));
    output.push_str(&generate_plots_section(&report.plots, options.list_good_samples));
    output.push_str(&generate_trends_section(&report.trends));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Session:** {}\n", metadata.session_id));
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Sources:** {}\n", metadata.sources));
    section.push_str(&format!("- **Plots Checked:** {}\n", metadata.plots_checked));
    section.push_str(&format!("- **Rate Intervals:** {}\n", metadata.rate_intervals));
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn anchor(plot: &str) -> String {
    plot.replace(['/', '.', ' '], "-").to_lowercase()
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &SessionReport) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Summary](#summary)\n");
    toc.push_str("- [Bad Time Ranges](#bad-time-ranges)\n");
    toc.push_str("- [Plots](#plots)\n");

    for plot in &report.plots {
        toc.push_str(&format!("  - [{}](#{})\n", plot.plot, anchor(&plot.plot)));
    }

    if !report.trends.is_empty() {
        toc.push_str("- [Trends](#trends)\n");
    }

    toc.push('\n');

    toc
}

/// Generate the summary section.
fn generate_summary_section(report: &SessionReport, top_runs: usize) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");

    section.push_str("| Plot | Samples | Unclassified | Intervals | Bad Samples |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|\n");
    for plot in &report.plots {
        section.push_str(&format!(
            "| `{}` | {} | {} | {} | {} |\n",
            plot.plot,
            plot.samples_loaded,
            plot.samples_unclassified,
            plot.intervals.len(),
            plot.bad_intervals.len()
        ));
    }
    section.push('\n');

    let affected = most_affected_runs(&report.bad_time_ranges, top_runs);
    if !affected.is_empty() {
        let all_bad: Vec<_> = report
            .plots
            .iter()
            .flat_map(|p| p.bad_intervals.iter().cloned())
            .collect();
        let plot_counts = plots_per_run(&all_bad);

        section.push_str("### Most Affected Runs\n\n");
        section.push_str("| Run | Bad Time | Plots Flagging |\n");
        section.push_str("|:---|:---:|:---:|\n");

        for (run, total_ms) in affected {
            section.push_str(&format!(
                "| {} | {:.0}s | {} |\n",
                run,
                total_ms as f64 / 1000.0,
                plot_counts.get(&run).copied().unwrap_or(0)
            ));
        }
        section.push('\n');
    }

    section
}

/// Generate the per-run list of merged bad time ranges.
fn generate_bad_ranges_section(report: &SessionReport) -> String {
    let mut section = String::new();

    section.push_str("## Bad Time Ranges\n\n");

    if report.bad_time_ranges.is_empty() {
        section.push_str("No bad time ranges were found.\n\n");
        return section;
    }

    section.push_str(&format!(
        "{} range(s) in {} run(s).\n\n",
        report.total_bad_ranges(),
        report.bad_time_ranges.len()
    ));

    for (run, ranges) in &report.bad_time_ranges {
        section.push_str(&format!("### Run {}\n\n", run));
        for range in ranges {
            section.push_str(&format!("- {}\n", range.hms_range()));
        }
        section.push('\n');
    }

    section
}

/// Generate the plots section.
fn generate_plots_section(plots: &[PlotReport], list_good_samples: bool) -> String {
    let mut section = String::new();

    section.push_str("## Plots\n\n");

    if plots.is_empty() {
        section.push_str("No plots were configured.\n\n");
        return section;
    }

    for plot in plots {
        section.push_str(&generate_plot_section(plot, list_good_samples));
    }

    section
}

/// Generate the section of a single plot.
fn generate_plot_section(plot: &PlotReport, list_good_samples: bool) -> String {
    let mut section = String::new();

    section.push_str(&format!("### {} {{#{}}}\n\n", plot.plot, anchor(&plot.plot)));
    section.push_str(&format!(
        "*Samples: {} | Unclassified: {} | Bad: {}*\n\n",
        plot.samples_loaded,
        plot.samples_unclassified,
        plot.bad_intervals.len()
    ));

    if plot.intervals.is_empty() {
        section.push_str("No samples fell into a rate interval.\n\n");
        return section;
    }

    for interval in &plot.intervals {
        section.push_str(&generate_interval_block(interval, list_good_samples));
    }

    section
}

/// Generate the block of one rate interval.
fn generate_interval_block(interval: &IntervalReport, list_good_samples: bool) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "#### {:.1} - {:.1} kHz\n\n",
        interval.rate_low, interval.rate_high
    ));

    match interval.denominator {
        Some(ref source) => block.push_str(&format!(
            "**Denominator:** {} | **Bad:** {}/{}\n\n",
            source,
            interval.bad_count(),
            interval.samples.len()
        )),
        None => {
            block.push_str(&format!(
                "**Denominator:** none, {} sample(s) not checked\n\n",
                interval.unchecked
            ));
            return block;
        }
    }

    let rows: Vec<&SampleReport> = interval
        .samples
        .iter()
        .filter(|s| list_good_samples || s.verdict == Verdict::Bad)
        .collect();

    if rows.is_empty() {
        block.push_str(&format!(
            "All {} sample(s) are good.\n\n",
            interval.samples.len()
        ));
        return block;
    }

    block.push_str("| Run | Validity | Rate (kHz) | Bad Bins | Verdict |\n");
    block.push_str("|:---|:---|:---:|:---:|:---:|\n");
    for sample in rows {
        block.push_str(&generate_sample_row(sample));
    }
    block.push('\n');

    if interval.unchecked > 0 {
        block.push_str(&format!(
            "*{} sample(s) could not be compared.*\n\n",
            interval.unchecked
        ));
    }

    block
}

fn generate_sample_row(sample: &SampleReport) -> String {
    let verdict = match sample.verdict {
        Verdict::Good => "good",
        Verdict::Bad => "**BAD**",
    };
    let run = if sample.is_reference {
        format!("{} (ref)", sample.run)
    } else {
        sample.run.to_string()
    };

    format!(
        "| {} | {} - {} | {:.2} | {}/{} ({:.0}%) | {} |\n",
        run,
        format_hms(sample.validity.min),
        format_hms(sample.validity.max),
        sample.rate_khz,
        sample.bad_bins,
        sample.checked_bins,
        sample.frac_bad * 100.0,
        verdict
    )
}

/// Generate the trends section.
fn generate_trends_section(trends: &[TrendReport]) -> String {
    if trends.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Trends\n\n");

    for trend in trends {
        section.push_str(&format!("### {}\n\n", trend.plot));
        if trend.runs.is_empty() {
            section.push_str("No data.\n\n");
            continue;
        }

        section.push_str("| Run | Rate (kHz) | Mean |\n");
        section.push_str("|:---|:---:|:---:|\n");
        for (run, points) in &trend.runs {
            for point in points {
                section.push_str(&format!(
                    "| {} | {:.2} | {:.4} |\n",
                    run, point.rate_khz, point.mean
                ));
            }
        }
        section.push('\n');
    }

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by ratebin-qc v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &SessionReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AggregatedInterval, BadInterval, DenominatorSource, TrendPoint, Validity,
    };
    use chrono::Utc;

    fn sample(run: u32, min: u64, verdict: Verdict) -> SampleReport {
        SampleReport {
            run,
            validity: Validity::new(min, min + 60_000),
            rate_khz: 30.0,
            frac_bad: if verdict == Verdict::Bad { 0.5 } else { 0.0 },
            checked_bins: 4,
            bad_bins: if verdict == Verdict::Bad { 2 } else { 0 },
            verdict,
            is_reference: run == 300,
            shape: None,
        }
    }

    fn create_test_report() -> SessionReport {
        let metadata = ReportMetadata {
            session_id: "LHC23zzh".to_string(),
            analysis_date: Utc::now(),
            sources: 3,
            plots_checked: 1,
            rate_intervals: 450,
            duration_seconds: 1.5,
        };

        SessionReport {
            metadata,
            plots: vec![PlotReport {
                plot: "TPC/Tracks/hEta".to_string(),
                samples_loaded: 3,
                samples_unclassified: 0,
                intervals: vec![
                    IntervalReport {
                        index: 199,
                        rate_low: 30.0,
                        rate_high: 30.1,
                        denominator: Some(DenominatorSource::Reference { run: 300, samples: 1 }),
                        denominator_shape: None,
                        samples: vec![
                            sample(300, 0, Verdict::Good),
                            sample(200, 3_600_000, Verdict::Bad),
                        ],
                        unchecked: 0,
                    },
                    IntervalReport {
                        index: 300,
                        rate_low: 19.9,
                        rate_high: 20.0,
                        denominator: None,
                        denominator_shape: None,
                        samples: Vec::new(),
                        unchecked: 1,
                    },
                ],
                bad_intervals: vec![BadInterval {
                    run: 200,
                    plot: "TPC/Tracks/hEta".to_string(),
                    validity: Validity::new(3_600_000, 3_660_000),
                }],
            }],
            trends: vec![TrendReport {
                plot: "ITS/Clusters/ROFSize".to_string(),
                runs: vec![(200, vec![TrendPoint { rate_khz: 30.0, mean: 12.5 }])],
            }],
            bad_time_ranges: vec![(
                200,
                vec![AggregatedInterval {
                    run: 200,
                    start: 3_600_000,
                    end: 3_660_000,
                }],
            )],
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report, &ReportConfig::default());

        assert!(markdown.contains("# Rate-Binned QC Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("## Bad Time Ranges"));
        assert!(markdown.contains("### Run 200"));
        assert!(markdown.contains("- 01:00:00 - 01:01:00"));
        assert!(markdown.contains("TPC/Tracks/hEta"));
        assert!(markdown.contains("reference run 300 (1 samples)"));
        assert!(markdown.contains("300 (ref)"));
        assert!(markdown.contains("none, 1 sample(s) not checked"));
        assert!(markdown.contains("## Trends"));
        assert!(markdown.contains("### Most Affected Runs"));
    }

    #[test]
    fn test_good_samples_can_be_hidden() {
        let report = create_test_report();
        let options = ReportConfig {
            list_good_samples: false,
            ..ReportConfig::default()
        };
        let markdown = generate_markdown_report(&report, &options);

        assert!(!markdown.contains("300 (ref)"));
        assert!(markdown.contains("**BAD**"));
    }

    #[test]
    fn test_generate_metadata_section() {
        let report = create_test_report();
        let section = generate_metadata_section(&report.metadata);

        assert!(section.contains("LHC23zzh"));
        assert!(section.contains("- **Sources:** 3"));
        assert!(section.contains("- **Rate Intervals:** 450"));
    }

    #[test]
    fn test_bad_ranges_section_without_ranges() {
        let mut report = create_test_report();
        report.bad_time_ranges.clear();
        let section = generate_bad_ranges_section(&report);
        assert!(section.contains("No bad time ranges were found."));
    }

    #[test]
    fn test_generate_sample_row() {
        let row = generate_sample_row(&sample(200, 3_600_000, Verdict::Bad));
        assert!(row.contains("| 200 |"));
        assert!(row.contains("01:00:00 - 01:01:00"));
        assert!(row.contains("2/4 (50%)"));
        assert!(row.contains("**BAD**"));
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"session_id\""));
        assert!(json.contains("\"bad_time_ranges\""));
        assert!(json.contains("\"source\": \"reference\""));
        // shapes are omitted unless requested
        assert!(!json.contains("\"shape\""));
    }
}
