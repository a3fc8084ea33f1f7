//! Processing of a group of runs or configurations. Which of the
//! strategies applies is decided from directory names and contents,
//! see `classify_group`.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use kstring::KString;
use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    context::EvalContext,
    debug,
    descriptor::DESCRIPTOR_FILE_NAME,
    error::{InDirectory, PipelineError},
    export::RAW_EXPORT_DIR,
    info,
    load::file::read_table,
    stats::Stats,
    table::{column_key::ColumnKey, RunSummary, Table, PARALLELISM},
    warn,
};

use super::{
    single::{SingleExperimentProcessor, FINAL_DF_FILE, MEAN_STDERR_FILE, PLOTS_DIR},
    strategies,
};

lazy_static! {
    /// TaskManager configuration, e.g. `4_tm_8_ts_per_tm`
    pub static ref TM_MARKER: Regex = Regex::new(r"(?:^|_)(\d+)_tm(?:_|$)").expect("valid regex");
    pub static ref TM_CONFIG: Regex =
        Regex::new(r"(\d+)_tm_(\d+)_ts_per_tm").expect("valid regex");
    /// Flink image resources: millicores and MiB
    pub static ref RESOURCE_MARKER: Regex =
        Regex::new(r"flink-(\d+)m-(\d+)").expect("valid regex");
    static ref NUMERIC: Regex = Regex::new(r"^\d+$").expect("valid regex");
}

pub const RUNS_COLUMN: &str = "Runs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(strum_macros::IntoStaticStr, strum_macros::EnumString, strum_macros::EnumIter)]
pub enum GroupStrategy {
    #[strum(serialize = "box_plot")]
    BoxPlot,
    #[strum(serialize = "resource_analysis")]
    ResourceAnalysis,
    #[strum(serialize = "default_multi_run")]
    DefaultMultiRun,
    #[strum(serialize = "throughput_comparison")]
    ThroughputComparison,
}

impl GroupStrategy {
    pub fn tag(self) -> &'static str {
        self.into()
    }
}

pub fn dir_name(path: &Path) -> &str {
    path.file_name().and_then(|s| s.to_str()).unwrap_or("")
}

pub fn is_numeric_name(name: &str) -> bool {
    NUMERIC.is_match(name)
}

/// Subdirectories of `dir` except our own output directories,
/// numerically named ones in numeric order first, then the others
/// by name.
pub fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::Error::from(PipelineError::PathNotFound {
                path: dir.to_owned(),
            })
        } else {
            anyhow!("listing directory {dir:?}: {e}")
        }
    })?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| anyhow!("listing directory {dir:?}"))?;
        let path = entry.path();
        let name = dir_name(&path);
        if path.is_dir() && name != PLOTS_DIR && name != RAW_EXPORT_DIR && !name.starts_with('.') {
            dirs.push(path);
        }
    }
    dirs.sort_by_key(|p| {
        let name = dir_name(p);
        match name.parse::<u64>() {
            Ok(n) => (0, n, String::new()),
            Err(_) => (1, 0, name.to_string()),
        }
    });
    Ok(dirs)
}

/// Whether `dir` holds the data of one run.
pub fn is_run_dir(dir: &Path) -> bool {
    [DESCRIPTOR_FILE_NAME, FINAL_DF_FILE, MEAN_STDERR_FILE]
        .iter()
        .any(|f| dir.join(f).is_file())
}

/// The runs of a configuration: its run subdirectories, or the
/// directory itself if it has none and is a run.
pub fn runs_of(dir: &Path) -> Result<Vec<PathBuf>> {
    let runs: Vec<PathBuf> = subdirs(dir)?.into_iter().filter(|d| is_run_dir(d)).collect();
    if runs.is_empty() && is_run_dir(dir) {
        Ok(vec![dir.to_owned()])
    } else {
        Ok(runs)
    }
}

/// Decide the strategy for the group directory `path`, first match
/// wins:
///
/// 1. its name or a subdirectory name has a TaskManager marker
/// 2. a subdirectory name has a Flink resource marker, or the group
///    is named as a resource experiment
/// 3. numerically named subdirectories, each with a run descriptor
/// 4. at least two subdirectories holding a run summary
///
/// Otherwise it's a `StrategyUnresolved` error, or, if
/// `strict_dispatch` is off, a warning and `DefaultMultiRun`.
pub fn classify_group(ctx: &EvalContext, path: &Path) -> Result<GroupStrategy> {
    let name = dir_name(path);
    let dirs = subdirs(path)?;
    let names: Vec<&str> = dirs.iter().map(|d| dir_name(d)).collect();
    debug!(ctx, "classifying group {path:?}, subdirectories {names:?}");

    if TM_MARKER.is_match(name) || names.iter().any(|n| TM_MARKER.is_match(n)) {
        return Ok(GroupStrategy::BoxPlot);
    }
    if names.iter().any(|n| RESOURCE_MARKER.is_match(n))
        || name.starts_with("res_exp")
        || name.contains("resource")
    {
        return Ok(GroupStrategy::ResourceAnalysis);
    }
    let numeric: Vec<&PathBuf> = dirs
        .iter()
        .filter(|d| is_numeric_name(dir_name(d)))
        .collect();
    if !numeric.is_empty() && numeric.iter().all(|d| d.join(DESCRIPTOR_FILE_NAME).is_file()) {
        return Ok(GroupStrategy::DefaultMultiRun);
    }
    if dirs.iter().filter(|d| d.join(MEAN_STDERR_FILE).is_file()).count() >= 2 {
        return Ok(GroupStrategy::ThroughputComparison);
    }

    let reason = if dirs.is_empty() {
        "no subdirectories".to_string()
    } else {
        format!("no known layout matches subdirectories {names:?}")
    };
    if ctx.config.strict_dispatch {
        Err(PipelineError::StrategyUnresolved {
            path: path.to_owned(),
            reason,
        }
        .into())
    } else {
        warn!(ctx, "{path:?}: {reason}, processing as multi-run group");
        Ok(GroupStrategy::DefaultMultiRun)
    }
}

/// A run left out of a group's aggregate.
#[derive(Debug)]
pub struct RunExclusion {
    pub run: PathBuf,
    pub reason: anyhow::Error,
}

/// The run summary of `run_dir`: the existing `mean_stderr.csv`, or
/// the result of processing the run.
pub fn summarize_run(ctx: &EvalContext, run_dir: &Path) -> Result<RunSummary> {
    let path = run_dir.join(MEAN_STDERR_FILE);
    if path.is_file() {
        debug!(ctx, "using existing {path:?}");
        read_table(&path)
    } else {
        Ok(SingleExperimentProcessor::new(ctx, run_dir).process()?.summary)
    }
}

/// Summaries of all of `runs`; failing runs are logged and returned
/// as exclusions.
pub fn summarize_runs(
    ctx: &EvalContext,
    runs: &[PathBuf],
) -> (Vec<(PathBuf, RunSummary)>, Vec<RunExclusion>) {
    let mut summaries = Vec::new();
    let mut exclusions = Vec::new();
    for run in runs {
        match summarize_run(ctx, run) {
            Ok(summary) => summaries.push((run.clone(), summary)),
            Err(reason) => {
                warn!(ctx, "excluding run {run:?}: {reason:#}");
                exclusions.push(RunExclusion {
                    run: run.clone(),
                    reason,
                });
            }
        }
    }
    (summaries, exclusions)
}

/// The metrics of run summaries: their columns without the standard
/// error ones, in first-seen order.
pub fn summary_metrics<'s>(summaries: impl IntoIterator<Item = &'s RunSummary>) -> Vec<KString> {
    let mut seen = BTreeSet::new();
    let mut metrics = Vec::new();
    for summary in summaries {
        for key in summary.columns() {
            if key.is_plain() && !key.metric.ends_with("StdErr") && seen.insert(key.metric.clone()) {
                metrics.push(key.metric.clone());
            }
        }
    }
    metrics
}

pub fn stat_column(metric: &str, stat: &str) -> ColumnKey {
    ColumnKey::plain(&format!("{metric}_{stat}"))
}

/// Append `<metric>_mean`, `_std`, `_min`, `_max` computed over
/// `values`; all absent if there are none, `_std` absent for a
/// single value.
pub fn push_stats(row: &mut Vec<Option<f64>>, values: impl IntoIterator<Item = Option<f64>>) {
    match Stats::from_present(values) {
        Some(stats) => {
            row.push(Some(stats.mean));
            row.push(stats.standard_deviation());
            row.push(Some(stats.min));
            row.push(Some(stats.max));
        }
        None => row.extend([None; 4]),
    }
}

pub const STATS: [&str; 4] = ["mean", "std", "min", "max"];

/// The group summary keyed by parallelism: for every level seen in
/// any run and every metric, mean, sample standard deviation, min
/// and max over the runs that have a value; plus the number of runs
/// with that level.
pub fn aggregate_by_parallelism(summaries: &[&RunSummary]) -> Result<Table<u32>> {
    let metrics = summary_metrics(summaries.iter().copied());
    let mut table = Table::<u32>::new(PARALLELISM);
    for metric in &metrics {
        for stat in STATS {
            table.add_column(stat_column(metric, stat))?;
        }
    }
    table.add_column(ColumnKey::plain(RUNS_COLUMN))?;

    let levels: BTreeSet<u32> = summaries.iter().flat_map(|s| s.index().copied()).collect();
    for level in levels {
        let mut row = Vec::with_capacity(metrics.len() * 4 + 1);
        for metric in &metrics {
            let key = ColumnKey::plain(metric);
            push_stats(&mut row, summaries.iter().map(|s| s.get(&level, &key)));
        }
        let runs = summaries.iter().filter(|s| s.row(&level).is_some()).count();
        row.push(Some(runs as f64));
        table.insert_row(level, row)?;
    }
    Ok(table)
}

#[derive(Debug)]
pub enum GroupSummary {
    ByParallelism(Table<u32>),
    /// Keyed by configuration or machine label
    ByLabel(Table<KString>),
}

impl GroupSummary {
    pub fn len(&self) -> usize {
        match self {
            GroupSummary::ByParallelism(t) => t.len(),
            GroupSummary::ByLabel(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct GroupOutcome {
    pub group_dir: PathBuf,
    pub strategy: GroupStrategy,
    pub summary: GroupSummary,
    /// Runs (or pre-summarized subdirectories) that contributed
    pub included: Vec<PathBuf>,
    pub exclusions: Vec<RunExclusion>,
    /// Data files written
    pub written: Vec<PathBuf>,
    pub plots: Vec<PathBuf>,
}

pub struct GroupedExperimentProcessor<'c> {
    ctx: &'c EvalContext,
    group_dir: PathBuf,
}

impl<'c> GroupedExperimentProcessor<'c> {
    pub fn new(ctx: &'c EvalContext, group_dir: &Path) -> Self {
        Self {
            ctx,
            group_dir: group_dir.to_owned(),
        }
    }

    pub fn process(&self) -> Result<GroupOutcome> {
        let ctx = self.ctx;
        let dir = &self.group_dir;
        if !dir.is_dir() {
            return Err(PipelineError::PathNotFound { path: dir.clone() }.into());
        }
        let strategy = classify_group(ctx, dir)?;
        info!(ctx, "processing group {dir:?} with strategy {}", strategy.tag());
        self.process_with(strategy)
    }

    /// Process with the given strategy, skipping classification.
    pub fn process_with(&self, strategy: GroupStrategy) -> Result<GroupOutcome> {
        let outcome = match strategy {
            GroupStrategy::DefaultMultiRun => strategies::default_multi_run(self.ctx, &self.group_dir),
            GroupStrategy::BoxPlot => strategies::box_plot(self.ctx, &self.group_dir),
            GroupStrategy::ResourceAnalysis => {
                strategies::resource_analysis(self.ctx, &self.group_dir)
            }
            GroupStrategy::ThroughputComparison => {
                strategies::throughput_comparison(self.ctx, &self.group_dir)
            }
        }
        .with_context(|| anyhow!("{} strategy", strategy.tag()))
        .with_context(|| InDirectory(self.group_dir.clone()))?;
        if !outcome.exclusions.is_empty() {
            warn!(
                self.ctx,
                "{:?}: {} of {} runs excluded",
                self.group_dir,
                outcome.exclusions.len(),
                outcome.exclusions.len() + outcome.included.len()
            );
        }
        Ok(outcome)
    }
}
