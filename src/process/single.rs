//! Processing of one run: trimming of the unstable ends of each
//! parallelism segment, derived metrics, and mean / standard error
//! per parallelism level.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use kstring::KString;

use crate::{
    config::{DerivedMetric, Reduction, TrimmingConfig},
    context::EvalContext,
    descriptor::{ExperimentDescriptor, DESCRIPTOR_FILE_NAME},
    error::{InDirectory, PipelineError},
    export::{export_raw_samples, export_table_logged, RAW_EXPORT_DIR},
    info,
    load::{
        file::FileSource, metrics_db::MetricsDbSource, mock::MockSource, SampleSource, TableSource,
    },
    metrics::processor::MetricsProcessor,
    plot::{Panel, PlotData, PlotOptions, PlotRegistry, Point, Series},
    stats::Stats,
    table::{column_key::ColumnKey, RunSummary, Timestamp, UnifiedTable, PARALLELISM},
    warn,
};

pub const FINAL_DF_FILE: &str = "final_df.csv";
/// Table name of `FINAL_DF_FILE` as loaded by a `TableSource`
pub const FINAL_DF_TABLE: &str = "final_df";
pub const MEAN_STDERR_FILE: &str = "mean_stderr.csv";
pub const PLOTS_DIR: &str = "plots";

/// Descriptor config key overriding `trimming.warmup_s` for a run.
pub const OUTPUT_SKIP_KEY: &str = "experiment.output_skip_s";

pub const THROUGHPUT: &str = "Throughput";

pub fn stderr_column_name(metric: &str) -> String {
    format!("{metric}StdErr")
}

#[derive(Debug)]
pub struct SingleOutcome {
    pub run_dir: PathBuf,
    pub summary: RunSummary,
    pub summary_path: PathBuf,
    /// `PipelineError::InsufficientSamples` for every (parallelism,
    /// metric) whose standard error could not be computed
    pub insufficient: Vec<PipelineError>,
    pub plots: Vec<PathBuf>,
}

/// Keep only the rows of each contiguous parallelism segment that
/// are at least `warmup_s` after its first row and at least
/// `cooldown_s` before its last row. Rows without a parallelism
/// value are dropped.
pub fn trim_segments(table: &UnifiedTable, trimming: &TrimmingConfig) -> UnifiedTable {
    let mut segments: Vec<(u32, Timestamp, Timestamp)> = Vec::new();
    for ts in table.index() {
        let Some(p) = table.parallelism_at(ts) else {
            continue;
        };
        match segments.last_mut() {
            Some((lp, _, end)) if *lp == p => *end = *ts,
            _ => segments.push((p, *ts, *ts)),
        }
    }
    let mut trimmed = table.clone();
    let mut segment_iter = segments.iter().peekable();
    trimmed.retain_rows(|ts, _| {
        while let Some((_, _, end)) = segment_iter.peek() {
            if ts > end {
                segment_iter.next();
            } else {
                break;
            }
        }
        match segment_iter.peek() {
            Some((p, start, end)) if ts >= start && table.parallelism_at(ts) == Some(*p) => {
                ts - start >= trimming.warmup_s && end - ts >= trimming.cooldown_s
            }
            _ => false,
        }
    });
    trimmed
}

/// The columns `derived` is computed from: the per-subtask columns
/// of the task, else the task's total column, else the plain column
/// of the source metric.
fn source_columns(
    table: &UnifiedTable,
    derived: &DerivedMetric,
    operator_task: &str,
) -> Result<Vec<usize>> {
    let task_matches = |task: &str| match &derived.task {
        Some(t) => task.contains(t.as_str()),
        None => task == operator_task,
    };
    let positions = |pred: &dyn Fn(&ColumnKey) -> bool| -> Vec<usize> {
        table
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, k)| k.metric.as_str() == derived.source.as_str() && pred(k))
            .map(|(i, _)| i)
            .collect()
    };

    let per_subtask = positions(&|k| {
        k.subtask.is_some() && k.task.as_deref().is_some_and(|t| task_matches(t))
    });
    if !per_subtask.is_empty() {
        return Ok(per_subtask);
    }
    let totals = positions(&|k| {
        k.subtask.is_none() && k.task.as_deref().is_some_and(|t| task_matches(t))
    });
    if !totals.is_empty() {
        return Ok(totals);
    }
    let plain = positions(&|k| k.is_plain());
    if !plain.is_empty() {
        return Ok(plain);
    }
    let task = derived.task.as_deref().unwrap_or(operator_task);
    Err(PipelineError::MissingColumn {
        column: ColumnKey::task_total(&derived.source, task),
        needed_for: format!("derived metric {}", derived.name),
    }
    .into())
}

/// A table with the `Parallelism` column and one plain column per
/// derived metric, for the rows of `table`.
pub fn derive_metrics(
    table: &UnifiedTable,
    derived_metrics: &[DerivedMetric],
    operator_task: &str,
) -> Result<UnifiedTable> {
    let sources: Vec<Vec<usize>> = derived_metrics
        .iter()
        .map(|d| source_columns(table, d, operator_task))
        .collect::<Result<_>>()?;

    let mut derived = UnifiedTable::new(table.index_name());
    let parallelism_key = ColumnKey::plain(PARALLELISM);
    derived.add_column(parallelism_key.clone())?;
    let keys: Vec<ColumnKey> = derived_metrics
        .iter()
        .map(|d| ColumnKey::plain(&d.name))
        .collect();
    for key in &keys {
        derived.add_column(key.clone())?;
    }

    for (ts, values) in table.rows() {
        let mut row = Vec::with_capacity(keys.len() + 1);
        row.push(table.parallelism_at(ts).map(f64::from));
        for (d, positions) in derived_metrics.iter().zip(&sources) {
            let present: Vec<f64> = positions.iter().filter_map(|i| values[*i]).collect();
            let value = if present.is_empty() {
                None
            } else {
                let sum: f64 = present.iter().sum();
                Some(match d.reduction {
                    Reduction::Sum => sum,
                    Reduction::Mean => sum / present.len() as f64,
                })
            };
            row.push(value.map(|v| v * d.scale));
        }
        derived.insert_row(*ts, row)?;
    }
    Ok(derived)
}

/// Mean and standard error per parallelism level of every non
/// parallelism column of `derived`. Levels whose throughput mean is
/// absent or not positive are dropped. Also returns the
/// insufficient-data reports for the kept levels.
pub fn summarize(derived: &UnifiedTable) -> Result<(RunSummary, Vec<PipelineError>)> {
    let metrics: Vec<ColumnKey> = derived.columns_matching(|k| k.metric.as_str() != PARALLELISM);

    let mut by_level: BTreeMap<u32, Vec<&[Option<f64>]>> = BTreeMap::new();
    for (ts, values) in derived.rows() {
        if let Some(p) = derived.parallelism_at(ts) {
            by_level.entry(p).or_default().push(values);
        }
    }

    let mut summary = RunSummary::new(PARALLELISM);
    for key in &metrics {
        summary.add_column(key.clone())?;
        summary.add_column(ColumnKey::plain(&stderr_column_name(&key.metric)))?;
    }
    let mut insufficient = Vec::new();
    for (parallelism, rows) in by_level {
        let mut row = Vec::with_capacity(metrics.len() * 2);
        let mut reports = Vec::new();
        for key in &metrics {
            let pos = derived.require_column(key, "run summary")?;
            let stats = Stats::from_present(rows.iter().map(|vals| vals[pos]));
            let n = stats.as_ref().map(|s| s.num_values).unwrap_or(0);
            let stderr = stats.as_ref().and_then(|s| s.standard_error());
            if stderr.is_none() {
                reports.push(PipelineError::InsufficientSamples {
                    parallelism,
                    metric: key.metric.to_string(),
                    n,
                });
            }
            row.push(stats.map(|s| s.mean));
            row.push(stderr);
        }
        let throughput = metrics
            .iter()
            .position(|k| k.metric.as_str() == THROUGHPUT)
            .map(|i| row[i * 2]);
        if let Some(throughput) = throughput {
            if !throughput.map(|t| t > 0.).unwrap_or(false) {
                continue;
            }
        }
        summary.insert_row(parallelism, row)?;
        insufficient.extend(reports);
    }
    Ok((summary, insufficient))
}

pub struct SingleExperimentProcessor<'c> {
    ctx: &'c EvalContext,
    run_dir: PathBuf,
    /// Replaces the metrics database when the unified table has to
    /// be built
    mock: Option<MockSource>,
}

impl<'c> SingleExperimentProcessor<'c> {
    pub fn new(ctx: &'c EvalContext, run_dir: &Path) -> Self {
        Self {
            ctx,
            run_dir: run_dir.to_owned(),
            mock: None,
        }
    }

    pub fn with_mock(mut self, mock: MockSource) -> Self {
        self.mock = Some(mock);
        self
    }

    fn descriptor(&self) -> Result<Option<ExperimentDescriptor>> {
        if let Some(mock) = &self.mock {
            return Ok(Some(mock.descriptor()));
        }
        if self.run_dir.join(DESCRIPTOR_FILE_NAME).exists() {
            Ok(Some(ExperimentDescriptor::load(&self.run_dir)?))
        } else {
            Ok(None)
        }
    }

    fn operator_task(&self, descriptor: Option<&ExperimentDescriptor>) -> KString {
        descriptor
            .and_then(|d| d.operator_task())
            .unwrap_or_else(|| self.ctx.config.operator_task.clone())
    }

    /// Fetch the raw series and build the unified table; writes the
    /// raw exports and `final_df.csv`.
    fn build_unified_table(&self, descriptor: &ExperimentDescriptor) -> Result<UnifiedTable> {
        let ctx = self.ctx;
        let catalog = ctx.config.metrics_db.catalog();
        let source = match &self.mock {
            Some(mock) => SampleSource::Mock(mock.clone()),
            None => SampleSource::MetricsDb(MetricsDbSource {
                config: &ctx.config.metrics_db,
                window: descriptor.window,
                flat_export_dir: Some(self.run_dir.join(RAW_EXPORT_DIR)),
            }),
        };
        let raw = source.load(ctx, &catalog)?;
        export_raw_samples(ctx, &raw, &self.run_dir.join(RAW_EXPORT_DIR))?;

        let operator_task = self.operator_task(Some(descriptor));
        let processor = MetricsProcessor {
            catalog: &catalog,
            operator_task: &operator_task,
        };
        let table = processor.build_unified_table(ctx, &raw, descriptor)?;
        export_table_logged(ctx, &table, &self.run_dir.join(FINAL_DF_FILE))?;
        Ok(table)
    }

    fn load_unified_table(&self, descriptor: Option<&ExperimentDescriptor>) -> Result<UnifiedTable> {
        let path = self.run_dir.join(FINAL_DF_FILE);
        if path.exists() {
            info!(self.ctx, "loading {path:?}");
            let mut tables: BTreeMap<KString, UnifiedTable> =
                TableSource::File(FileSource::new(&self.run_dir, &[FINAL_DF_FILE])).load()?;
            tables
                .remove(FINAL_DF_TABLE)
                .ok_or_else(|| anyhow!("no {FINAL_DF_TABLE} table in {path:?}"))
        } else {
            let descriptor = descriptor.ok_or_else(|| PipelineError::PathNotFound {
                path: self.run_dir.join(DESCRIPTOR_FILE_NAME),
            })?;
            self.build_unified_table(descriptor)
        }
    }

    fn trimming(&self, descriptor: Option<&ExperimentDescriptor>) -> TrimmingConfig {
        let mut trimming = self.ctx.config.trimming.clone();
        if let Some(skip) = descriptor
            .and_then(|d| d.config_value(OUTPUT_SKIP_KEY))
            .and_then(|v| v.as_u64())
        {
            trimming.warmup_s = skip;
        }
        trimming
    }

    pub fn process(&self) -> Result<SingleOutcome> {
        self.process_run()
            .with_context(|| InDirectory(self.run_dir.clone()))
    }

    fn process_run(&self) -> Result<SingleOutcome> {
        let ctx = self.ctx;
        if !self.run_dir.is_dir() {
            return Err(PipelineError::PathNotFound {
                path: self.run_dir.clone(),
            }
            .into());
        }
        info!(ctx, "processing run {:?}", self.run_dir);

        let descriptor = self.descriptor()?;
        let unified = self.load_unified_table(descriptor.as_ref())?;
        let trimmed = trim_segments(&unified, &self.trimming(descriptor.as_ref()));
        let operator_task = self.operator_task(descriptor.as_ref());
        let derived = derive_metrics(&trimmed, &ctx.config.derived_metrics, &operator_task)?;
        let (summary, insufficient) = summarize(&derived)?;
        for e in &insufficient {
            warn!(ctx, "{:?}: {e}", self.run_dir);
        }

        let summary_path = self.run_dir.join(MEAN_STDERR_FILE);
        export_table_logged(ctx, &summary, &summary_path)?;

        let plots = if ctx.config.plots.enabled {
            self.plot(&derived, &summary)
        } else {
            Vec::new()
        };

        Ok(SingleOutcome {
            run_dir: self.run_dir.clone(),
            summary,
            summary_path,
            insufficient,
            plots,
        })
    }

    /// Failures are logged, the returned paths are those written.
    fn plot(&self, derived: &UnifiedTable, summary: &RunSummary) -> Vec<PathBuf> {
        let ctx = self.ctx;
        let registry = PlotRegistry::default();
        let dir = self.run_dir.join(PLOTS_DIR);
        let (width, height) = (ctx.config.plots.width, ctx.config.plots.height);
        let mut written = Vec::new();

        let t0 = derived.index().next().copied().unwrap_or(0);
        let panels: Vec<Panel> = derived
            .columns()
            .iter()
            .filter_map(|key| {
                let points: Vec<Point> = derived
                    .column_values(key)
                    .ok()?
                    .filter_map(|(ts, v)| Some(Point::new((ts - t0) as f64, v?)))
                    .collect();
                Some(Panel {
                    ylabel: key.metric.to_string(),
                    ylim: None,
                    series: vec![Series {
                        label: key.metric.to_string(),
                        points,
                    }],
                })
            })
            .collect();
        let mut options = PlotOptions::new("experiment_plot.png");
        options.title = "Metrics over time".into();
        options.xlabel = "Time (s)".into();
        options.size = (width, height);
        match registry.generate(&PlotData::Panels(panels), "stacked", &options, &dir) {
            Ok(path) => written.push(path),
            Err(e) => warn!(ctx, "could not plot {:?}: {e:#}", self.run_dir),
        }

        let throughput = ColumnKey::plain(THROUGHPUT);
        let stderr = ColumnKey::plain(&stderr_column_name(THROUGHPUT));
        if summary.has_column(&throughput) && !summary.is_empty() {
            let points: Vec<Point> = summary
                .index()
                .filter_map(|p| {
                    let y = summary.get(p, &throughput)?;
                    Some(Point::with_err(f64::from(*p), y, summary.get(p, &stderr)))
                })
                .collect();
            let mut options = PlotOptions::new("summary_plot.png");
            options.title = "Throughput per parallelism".into();
            options.xlabel = PARALLELISM.into();
            options.ylabel = "Throughput (records/s)".into();
            options.ylim = ctx.config.plots.throughput_ylim;
            options.axhline = ctx.config.plots.workload_objective;
            options.size = (width, height);
            let data = PlotData::Series(vec![Series {
                label: THROUGHPUT.into(),
                points,
            }]);
            match registry.generate(&data, "basic", &options, &dir) {
                Ok(path) => written.push(path),
                Err(e) => warn!(ctx, "could not plot summary of {:?}: {e:#}", self.run_dir),
            }
        }
        for path in &written {
            info!(ctx, "wrote {path:?}");
        }
        written
    }
}
