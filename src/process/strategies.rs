//! The group processing strategies. Each one collects the run
//! summaries it needs, reduces them to one group summary, exports it
//! and renders its plots.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use itertools::Itertools;
use kstring::KString;

use crate::{
    context::EvalContext,
    export::export_table_logged,
    info,
    load::file::read_table,
    plot::{BoxSummary, Panel, PlotData, PlotOptions, PlotRegistry, Point, Series},
    stats::Stats,
    table::{column_key::ColumnKey, RunSummary, Table, PARALLELISM},
    warn,
};

use super::{
    grouped::{
        aggregate_by_parallelism, dir_name, is_numeric_name, push_stats, runs_of, stat_column,
        subdirs, summarize_runs, GroupOutcome, GroupStrategy, GroupSummary, RunExclusion,
        RESOURCE_MARKER, RUNS_COLUMN, STATS, TM_CONFIG, TM_MARKER,
    },
    single::{stderr_column_name, FINAL_DF_FILE, MEAN_STDERR_FILE, PLOTS_DIR, THROUGHPUT},
};

pub const AGGREGATED_RESULTS_FILE: &str = "aggregated_results.csv";
pub const BOX_PLOT_DATA_FILE: &str = "box_plot_data.csv";
pub const RESOURCE_DATA_FILE: &str = "resource_data.csv";
pub const THROUGHPUT_COMPARISON_FILE: &str = "throughput_comparison.csv";

const CONFIGURATION: &str = "Configuration";

/// Renders plots for one group directory, collecting the written
/// paths and logging failures.
struct GroupPlotter<'c> {
    ctx: &'c EvalContext,
    registry: PlotRegistry,
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl<'c> GroupPlotter<'c> {
    fn new(ctx: &'c EvalContext, group_dir: &Path) -> Self {
        Self {
            ctx,
            registry: PlotRegistry::default(),
            dir: group_dir.join(PLOTS_DIR),
            written: Vec::new(),
        }
    }

    fn options(&self, filename: &str, title: &str, xlabel: &str, ylabel: &str) -> PlotOptions {
        let mut options = PlotOptions::new(filename);
        options.title = title.into();
        options.xlabel = xlabel.into();
        options.ylabel = ylabel.into();
        options.size = (self.ctx.config.plots.width, self.ctx.config.plots.height);
        options
    }

    fn generate(&mut self, data: PlotData, plot_type: &str, options: &PlotOptions) {
        if !self.ctx.config.plots.enabled {
            return;
        }
        match self.registry.generate(&data, plot_type, options, &self.dir) {
            Ok(path) => {
                info!(self.ctx, "wrote {path:?}");
                self.written.push(path);
            }
            Err(e) => warn!(self.ctx, "could not plot {}: {e:#}", options.filename),
        }
    }
}

/// Points of `<metric>_mean` over parallelism, with min/max as error
/// bar.
fn mean_with_range(table: &Table<u32>, metric: &str) -> Vec<Point> {
    let (mean, min, max) = (
        stat_column(metric, "mean"),
        stat_column(metric, "min"),
        stat_column(metric, "max"),
    );
    table
        .index()
        .filter_map(|p| {
            let y = table.get(p, &mean)?;
            let err = table.get(p, &min).zip(table.get(p, &max));
            Some(Point {
                x: f64::from(*p),
                y,
                err,
            })
        })
        .collect()
}

/// Re-run the same job N times, average the results per parallelism
/// level.
pub fn default_multi_run(ctx: &EvalContext, group_dir: &Path) -> Result<GroupOutcome> {
    let dirs = subdirs(group_dir)?;
    let numeric: Vec<PathBuf> = dirs
        .iter()
        .filter(|d| is_numeric_name(dir_name(d)))
        .cloned()
        .collect();
    let runs = if numeric.is_empty() {
        runs_of(group_dir)?
    } else {
        numeric
    };
    if runs.is_empty() {
        bail!("no runs found in {group_dir:?}")
    }
    info!(ctx, "{} runs in {group_dir:?}", runs.len());

    let (summaries, exclusions) = summarize_runs(ctx, &runs);
    if summaries.is_empty() {
        bail!("all {} runs failed", exclusions.len())
    }
    let table = aggregate_by_parallelism(&summaries.iter().map(|(_, s)| s).collect_vec())?;

    let mut written = Vec::new();
    for file in [AGGREGATED_RESULTS_FILE, FINAL_DF_FILE] {
        let path = group_dir.join(file);
        export_table_logged(ctx, &table, &path)?;
        written.push(path);
    }

    let mut plotter = GroupPlotter::new(ctx, group_dir);
    let mut options = plotter.options(
        "throughput_across_runs.png",
        "Throughput across runs (mean, min..max)",
        PARALLELISM,
        "Throughput (records/s)",
    );
    options.ylim = ctx.config.plots.throughput_ylim;
    options.axhline = ctx.config.plots.workload_objective;
    let throughput = Series {
        label: THROUGHPUT.into(),
        points: mean_with_range(&table, THROUGHPUT),
    };
    plotter.generate(PlotData::Series(vec![throughput]), "basic", &options);

    let panels: Vec<Panel> = ["BusyTime", "BackpressureTime"]
        .iter()
        .filter(|m| table.has_column(&stat_column(m, "mean")))
        .map(|m| Panel {
            ylabel: format!("{m} (ms/s)"),
            ylim: None,
            series: vec![Series {
                label: m.to_string(),
                points: mean_with_range(&table, m),
            }],
        })
        .collect();
    if !panels.is_empty() {
        let options = plotter.options(
            "time_metrics_across_runs.png",
            "Time metrics across runs",
            PARALLELISM,
            "",
        );
        plotter.generate(PlotData::Panels(panels), "stacked", &options);
    }

    Ok(GroupOutcome {
        group_dir: group_dir.to_owned(),
        strategy: GroupStrategy::DefaultMultiRun,
        summary: GroupSummary::ByParallelism(table),
        included: summaries.into_iter().map(|(run, _)| run).collect(),
        exclusions,
        written,
        plots: plotter.written,
    })
}

/// `4_tm_8_ts_per_tm` => `4 TM, 8 TS/TM`; other names unchanged.
pub fn tm_label(name: &str) -> String {
    match TM_CONFIG.captures(name) {
        Some(caps) => format!("{} TM, {} TS/TM", &caps[1], &caps[2]),
        None => name.to_string(),
    }
}

/// (millicores, MiB) => (cores, GiB)
pub fn parse_resources(name: &str) -> Option<(f64, f64)> {
    let caps = RESOURCE_MARKER.captures(name)?;
    let millicores: u64 = caps[1].parse().ok()?;
    let mib: u64 = caps[2].parse().ok()?;
    Some((millicores as f64 / 1000., mib as f64 / 1024.))
}

/// One value per run of the configuration in `config_dir`: its mean
/// throughput at its lowest parallelism level.
struct ConfigurationThroughput {
    included: Vec<PathBuf>,
    exclusions: Vec<RunExclusion>,
    values: Vec<f64>,
}

fn configuration_throughput(ctx: &EvalContext, config_dir: &Path) -> Result<ConfigurationThroughput> {
    let runs = runs_of(config_dir)?;
    if runs.is_empty() {
        bail!("no runs found in {config_dir:?}")
    }
    let (summaries, mut exclusions) = summarize_runs(ctx, &runs);
    let throughput = ColumnKey::plain(THROUGHPUT);
    let mut included = Vec::new();
    let mut values = Vec::new();
    for (run, summary) in summaries {
        let value = summary
            .index()
            .next()
            .and_then(|p| summary.get(p, &throughput));
        match value {
            Some(v) => {
                values.push(v);
                included.push(run);
            }
            None => {
                warn!(ctx, "excluding run {run:?}: no throughput in its summary");
                exclusions.push(RunExclusion {
                    run,
                    reason: anyhow!("no throughput in run summary"),
                });
            }
        }
    }
    Ok(ConfigurationThroughput {
        included,
        exclusions,
        values,
    })
}

/// Add a `<Throughput>_{mean,std,min,max}` plus `Runs` row for
/// `label` to `table` (which must have these columns last).
fn push_throughput_row(
    table: &mut Table<KString>,
    label: &str,
    mut leading: Vec<Option<f64>>,
    values: &[f64],
) -> Result<()> {
    push_stats(&mut leading, values.iter().copied().map(Some));
    leading.push(Some(values.len() as f64));
    table.insert_row(KString::from_ref(label), leading)
}

fn throughput_stat_columns(table: &mut Table<KString>) -> Result<()> {
    for stat in STATS {
        table.add_column(stat_column(THROUGHPUT, stat))?;
    }
    table.add_column(ColumnKey::plain(RUNS_COLUMN))
}

/// Per configuration runs of differing TaskManager layouts, compared
/// as box plots of their throughput.
pub fn box_plot(ctx: &EvalContext, group_dir: &Path) -> Result<GroupOutcome> {
    let mut configs: Vec<PathBuf> = subdirs(group_dir)?
        .into_iter()
        .filter(|d| TM_MARKER.is_match(dir_name(d)))
        .collect();
    if configs.is_empty() {
        configs.push(group_dir.to_owned());
    }

    let mut table = Table::<KString>::new(CONFIGURATION);
    throughput_stat_columns(&mut table)?;
    let mut boxes = Vec::new();
    let mut included = Vec::new();
    let mut exclusions = Vec::new();
    for config in configs {
        let label = tm_label(dir_name(&config));
        let mut ct = match configuration_throughput(ctx, &config) {
            Ok(ct) => ct,
            Err(reason) => {
                warn!(ctx, "excluding configuration {config:?}: {reason:#}");
                exclusions.push(RunExclusion {
                    run: config,
                    reason,
                });
                continue;
            }
        };
        included.append(&mut ct.included);
        exclusions.append(&mut ct.exclusions);
        let Ok(stats) = Stats::from_values(ct.values.clone()) else {
            warn!(ctx, "no throughput values for configuration {label:?}");
            continue;
        };
        push_throughput_row(&mut table, &label, Vec::new(), &ct.values)?;
        boxes.push(BoxSummary {
            label,
            min: stats.min,
            q1: stats.quartiles.0,
            median: stats.median,
            q3: stats.quartiles.1,
            max: stats.max,
        });
    }
    if table.is_empty() {
        bail!("no configuration with usable runs")
    }

    let path = group_dir.join(BOX_PLOT_DATA_FILE);
    export_table_logged(ctx, &table, &path)?;

    let mut plotter = GroupPlotter::new(ctx, group_dir);
    let mut options = plotter.options(
        "multi_experiment_box_plot.png",
        "Throughput per TaskManager configuration",
        "TaskManager Configuration",
        "Throughput (records/s)",
    );
    options.ylim = ctx.config.plots.throughput_ylim;
    options.axhline = ctx.config.plots.workload_objective;
    plotter.generate(PlotData::Boxes(boxes), "whisker", &options);

    Ok(GroupOutcome {
        group_dir: group_dir.to_owned(),
        strategy: GroupStrategy::BoxPlot,
        summary: GroupSummary::ByLabel(table),
        included,
        exclusions,
        written: vec![path],
        plots: plotter.written,
    })
}

/// Throughput over the CPU and memory given to Flink.
pub fn resource_analysis(ctx: &EvalContext, group_dir: &Path) -> Result<GroupOutcome> {
    let configs: Vec<(PathBuf, (f64, f64))> = subdirs(group_dir)?
        .into_iter()
        .filter_map(|d| {
            let resources = parse_resources(dir_name(&d))?;
            Some((d, resources))
        })
        .collect();
    if configs.is_empty() {
        bail!("no subdirectory named like flink-<millicores>m-<MiB>")
    }

    let mut table = Table::<KString>::new(CONFIGURATION);
    table.add_column(ColumnKey::plain("Cores"))?;
    table.add_column(ColumnKey::plain("MemoryGiB"))?;
    throughput_stat_columns(&mut table)?;
    let mut points = Vec::new();
    let mut included = Vec::new();
    let mut exclusions = Vec::new();
    for (config, (cores, gib)) in configs {
        let mut ct = match configuration_throughput(ctx, &config) {
            Ok(ct) => ct,
            Err(reason) => {
                warn!(ctx, "excluding configuration {config:?}: {reason:#}");
                exclusions.push(RunExclusion {
                    run: config,
                    reason,
                });
                continue;
            }
        };
        included.append(&mut ct.included);
        exclusions.append(&mut ct.exclusions);
        let Some(stats) = Stats::from_present(ct.values.iter().copied().map(Some)) else {
            continue;
        };
        push_throughput_row(
            &mut table,
            dir_name(&config),
            vec![Some(cores), Some(gib)],
            &ct.values,
        )?;
        points.push((cores, gib, stats.mean));
    }
    if table.is_empty() {
        bail!("no resource configuration with usable runs")
    }

    let path = group_dir.join(RESOURCE_DATA_FILE);
    export_table_logged(ctx, &table, &path)?;

    let mut plotter = GroupPlotter::new(ctx, group_dir);
    let mut options = plotter.options(
        "resource_plot.png",
        "Throughput by resources",
        "CPU (cores)",
        "Memory (GiB)",
    );
    options.zlabel = "Throughput (records/s)".into();
    plotter.generate(PlotData::Points(points), "3d", &options);

    Ok(GroupOutcome {
        group_dir: group_dir.to_owned(),
        strategy: GroupStrategy::ResourceAnalysis,
        summary: GroupSummary::ByLabel(table),
        included,
        exclusions,
        written: vec![path],
        plots: plotter.written,
    })
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .join(" ")
}

/// Short machine type name for labels: `BM`, `VM-L`, `VM-S`, or the
/// directory name, title-cased.
pub fn machine_label(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.contains("bm") {
        "BM".into()
    } else if lower.contains("vml") || lower.contains("vm-l") {
        "VM-L".into()
    } else if lower.contains("vms") || lower.contains("vm-s") {
        "VM-S".into()
    } else {
        title_case(&lower.replace("single_node_", "").replace('_', " "))
    }
}

/// Pre-summarized runs on different machine types, compared per
/// parallelism level.
pub fn throughput_comparison(ctx: &EvalContext, group_dir: &Path) -> Result<GroupOutcome> {
    let machines: Vec<PathBuf> = subdirs(group_dir)?
        .into_iter()
        .filter(|d| d.join(MEAN_STDERR_FILE).is_file())
        .collect();
    let throughput = ColumnKey::plain(THROUGHPUT);
    let stderr = ColumnKey::plain(&stderr_column_name(THROUGHPUT));

    let mut summaries: Vec<(PathBuf, RunSummary)> = Vec::new();
    let mut exclusions = Vec::new();
    let mut written = Vec::new();
    let mut series = Vec::new();
    for machine in machines {
        let result = (|| -> Result<(RunSummary, PathBuf)> {
            let summary: RunSummary = read_table(&machine.join(MEAN_STDERR_FILE))?;
            summary.require_column(&throughput, "throughput comparison")?;
            let mut plot_data = RunSummary::new(PARALLELISM);
            plot_data.add_column(throughput.clone())?;
            plot_data.add_column(stderr.clone())?;
            for p in summary.index() {
                plot_data.insert_row(*p, vec![summary.get(p, &throughput), summary.get(p, &stderr)])?;
            }
            let path = group_dir.join(format!("{}_plot_data.csv", dir_name(&machine)));
            export_table_logged(ctx, &plot_data, &path)?;
            Ok((summary, path))
        })();
        match result {
            Ok((summary, path)) => {
                written.push(path);
                let points = summary
                    .index()
                    .filter_map(|p| {
                        let y = summary.get(p, &throughput)?;
                        Some(Point::with_err(f64::from(*p), y, summary.get(p, &stderr)))
                    })
                    .collect();
                series.push(Series {
                    label: machine_label(dir_name(&machine)),
                    points,
                });
                summaries.push((machine, summary));
            }
            Err(reason) => {
                warn!(ctx, "excluding {machine:?}: {reason:#}");
                exclusions.push(RunExclusion {
                    run: machine,
                    reason,
                });
            }
        }
    }
    if summaries.is_empty() {
        bail!("no subdirectory with a usable {MEAN_STDERR_FILE}")
    }

    let table = aggregate_by_parallelism(&summaries.iter().map(|(_, s)| s).collect_vec())?;
    let path = group_dir.join(THROUGHPUT_COMPARISON_FILE);
    export_table_logged(ctx, &table, &path)?;
    written.push(path);

    let mut plotter = GroupPlotter::new(ctx, group_dir);
    let mut options = plotter.options(
        "throughput_comparison.png",
        "Throughput by machine type",
        PARALLELISM,
        "Throughput (records/s)",
    );
    options.ylim = ctx.config.plots.throughput_ylim;
    options.axhline = ctx.config.plots.workload_objective;
    plotter.generate(PlotData::Series(series), "single_frame", &options);

    Ok(GroupOutcome {
        group_dir: group_dir.to_owned(),
        strategy: GroupStrategy::ThroughputComparison,
        summary: GroupSummary::ByParallelism(table),
        included: summaries.into_iter().map(|(m, _)| m).collect(),
        exclusions,
        written,
        plots: plotter.written,
    })
}
