use std::{collections::BTreeMap, path::Path};

use anyhow::{anyhow, Result};
use approx::assert_relative_eq;
use kstring::KString;

use expeval::{
    config::{DerivedMetric, Reduction, TrimmingConfig},
    context::EvalContext,
    error::PipelineError,
    export::export_table,
    load::{file::read_table, mock::MockSource},
    metrics::{catalog::default_catalog, processor::MetricsProcessor},
    plot::{PlotData, PlotOptions, PlotRegistry, Series},
    process::{
        grouped::{classify_group, stat_column, GroupStrategy, GroupSummary, RUNS_COLUMN},
        process_experiment_path,
        single::{trim_segments, SingleExperimentProcessor, FINAL_DF_FILE, MEAN_STDERR_FILE},
        strategies::AGGREGATED_RESULTS_FILE,
        ProcessOutcome,
    },
    table::{column_key::ColumnKey, RunSummary, UnifiedTable, PARALLELISM},
    utillib::logging::LogLevel,
};

fn ctx() -> EvalContext {
    let mut ctx = EvalContext {
        log_level: LogLevel::Quiet,
        ..Default::default()
    };
    ctx.config.plots.enabled = false;
    ctx.config.operator_task = KString::from_static("Map");
    ctx
}

fn mock_final_df(seed: u64) -> Result<UnifiedTable> {
    let mock = MockSource {
        seed,
        ..MockSource::default()
    };
    let mut tables: BTreeMap<KString, UnifiedTable> = mock.tables()?;
    tables
        .remove("final_df")
        .ok_or_else(|| anyhow!("mock has no final_df"))
}

/// A run directory as the runner leaves it after a previous
/// evaluation: descriptor plus unified table.
fn write_run(dir: &Path, seed: u64) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(
        dir.join("exp_log.json"),
        r#"{"timestamps": {"start": 0, "end": 600}, "config": {"experiment.task_name": "Map"}}"#,
    )?;
    export_table(&mock_final_df(seed)?, &dir.join(FINAL_DF_FILE))
}

fn write_summary(dir: &Path, throughput: f64) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join("exp_log.json"), r#"{"timestamps": {"start": 0, "end": 1}}"#)?;
    let mut s = RunSummary::new(PARALLELISM);
    s.set(2, &ColumnKey::plain("Throughput"), Some(throughput));
    export_table(&s, &dir.join(MEAN_STDERR_FILE))
}

#[test]
fn round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let table = mock_final_df(7)?;
    let path = dir.path().join(FINAL_DF_FILE);
    export_table(&table, &path)?;
    let back: UnifiedTable = read_table(&path)?;
    assert_eq!(back, table);
    assert_eq!(back.columns(), table.columns());

    write_run(&dir.path().join("1"), 7)?;
    let outcome = SingleExperimentProcessor::new(&ctx(), &dir.path().join("1")).process()?;
    let summary: RunSummary = read_table(&outcome.summary_path)?;
    assert_eq!(summary, outcome.summary);
    Ok(())
}

#[test]
fn bucketing_determinism() -> Result<()> {
    let mock = MockSource::default();
    let catalog = default_catalog();
    let processor = MetricsProcessor {
        catalog: &catalog,
        operator_task: "Map",
    };
    let ctx = ctx();
    let samples = mock.samples();
    let a = processor.build_unified_table(&ctx, &samples, &mock.descriptor())?;
    let b = processor.build_unified_table(&ctx, &samples, &mock.descriptor())?;
    assert_eq!(a, b);
    for ts in a.index() {
        assert_eq!(ts % 5, 0);
    }
    Ok(())
}

#[test]
fn trimming_monotonicity() -> Result<()> {
    let table = mock_final_df(3)?;
    let counts = |warmup_s, cooldown_s| -> BTreeMap<u32, usize> {
        let trimmed = trim_segments(
            &table,
            &TrimmingConfig {
                warmup_s,
                cooldown_s,
            },
        );
        let mut counts = BTreeMap::new();
        for p in 1..=3 {
            counts.insert(p, 0);
        }
        for ts in trimmed.index() {
            if let Some(p) = trimmed.parallelism_at(ts) {
                *counts.entry(p).or_default() += 1;
            }
        }
        counts
    };
    let windows = [(0, 0), (10, 0), (10, 10), (60, 30), (100, 30), (100, 150), (500, 500)];
    for pair in windows.windows(2) {
        let (smaller, larger) = (counts(pair[0].0, pair[0].1), counts(pair[1].0, pair[1].1));
        for p in 1..=3 {
            assert!(
                larger[&p] <= smaller[&p],
                "level {p}: {:?} -> {:?}",
                pair[0],
                pair[1]
            );
        }
    }
    assert_eq!(counts(0, 0)[&2], 40);
    assert_eq!(counts(500, 500)[&2], 0);
    Ok(())
}

#[test]
fn aggregation_correctness() -> Result<()> {
    let base = tempfile::tempdir()?;
    let group = base.path().join("multi_run_1");
    for (run, v) in [("1", 100.), ("2", 200.), ("3", 300.)] {
        write_summary(&group.join(run), v)?;
    }
    let outcome = process_experiment_path(&ctx(), &group)?;
    let ProcessOutcome::Grouped(outcome) = outcome else {
        panic!("expected a group outcome")
    };
    assert_eq!(outcome.strategy, GroupStrategy::DefaultMultiRun);
    assert_eq!(outcome.included.len(), 3);

    let written: expeval::table::Table<u32> = read_table(&group.join(AGGREGATED_RESULTS_FILE))?;
    let GroupSummary::ByParallelism(summary) = &outcome.summary else {
        panic!("expected a summary by parallelism")
    };
    assert_eq!(&written, summary);
    assert_eq!(written.get(&2, &stat_column("Throughput", "mean")), Some(200.));
    let std = written
        .get(&2, &stat_column("Throughput", "std"))
        .ok_or_else(|| anyhow!("std missing"))?;
    assert_relative_eq!(std, 100., epsilon = 1e-9);
    assert_eq!(written.get(&2, &stat_column("Throughput", "min")), Some(100.));
    assert_eq!(written.get(&2, &stat_column("Throughput", "max")), Some(300.));
    assert!(group.join(FINAL_DF_FILE).is_file());
    Ok(())
}

#[test]
fn group_of_mock_runs() -> Result<()> {
    let base = tempfile::tempdir()?;
    let group = base.path().join("multi_run_2");
    for seed in 1..=3 {
        write_run(&group.join(seed.to_string()), seed)?;
    }
    // a run that can't be processed is excluded, not fatal
    std::fs::create_dir_all(group.join("4"))?;
    std::fs::write(group.join("4/exp_log.json"), "not json")?;

    let ProcessOutcome::Grouped(outcome) = process_experiment_path(&ctx(), &group)? else {
        panic!("expected a group outcome")
    };
    assert_eq!(outcome.included.len(), 3);
    assert_eq!(outcome.exclusions.len(), 1);
    assert_eq!(outcome.exclusions[0].run, group.join("4"));
    let GroupSummary::ByParallelism(summary) = &outcome.summary else {
        panic!("expected a summary by parallelism")
    };
    assert_eq!(summary.index().copied().collect::<Vec<_>>(), [1, 2, 3]);
    for p in 1..=3u32 {
        let mean = summary
            .get(&p, &stat_column("Throughput", "mean"))
            .ok_or_else(|| anyhow!("no mean at {p}"))?;
        assert_relative_eq!(mean, 1000. * f64::from(p), max_relative = 0.02);
        assert_eq!(summary.get(&p, &ColumnKey::plain(RUNS_COLUMN)), Some(3.));
    }
    for run in 1..=3 {
        assert!(group.join(run.to_string()).join(MEAN_STDERR_FILE).is_file());
    }
    Ok(())
}

#[test]
fn strategy_dispatch() -> Result<()> {
    let ctx = ctx();
    let base = tempfile::tempdir()?;

    let tm = base.path().join("4_tm_8_ts_per_tm");
    std::fs::create_dir_all(tm.join("1"))?;
    assert_eq!(classify_group(&ctx, &tm)?, GroupStrategy::BoxPlot);

    let multi = base.path().join("multi_run_1");
    for run in ["1", "2", "3"] {
        std::fs::create_dir_all(multi.join(run))?;
        std::fs::write(multi.join(run).join("exp_log.json"), "{}")?;
    }
    assert_eq!(classify_group(&ctx, &multi)?, GroupStrategy::DefaultMultiRun);
    Ok(())
}

#[test]
fn insufficient_data() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut table = UnifiedTable::new("Timestamp");
    let rate = ColumnKey::plain("numRecordsInPerSecond");
    let p = ColumnKey::plain(PARALLELISM);
    for (ts, par, v) in [(0, 1., 10.), (5, 1., 12.), (10, 1., 14.), (15, 2., 30.)] {
        table.set(ts, &p, Some(par));
        table.set(ts, &rate, Some(v));
    }
    export_table(&table, &dir.path().join(FINAL_DF_FILE))?;

    let mut ctx = ctx();
    ctx.config.trimming = TrimmingConfig {
        warmup_s: 0,
        cooldown_s: 0,
    };
    ctx.config.derived_metrics = vec![DerivedMetric {
        name: KString::from_static("Throughput"),
        source: KString::from_static("numRecordsInPerSecond"),
        task: None,
        reduction: Reduction::Sum,
        scale: 1.,
    }];
    let outcome = SingleExperimentProcessor::new(&ctx, dir.path()).process()?;

    assert_eq!(outcome.insufficient.len(), 1);
    match &outcome.insufficient[0] {
        PipelineError::InsufficientSamples {
            parallelism,
            metric,
            n,
        } => {
            assert_eq!(*parallelism, 2);
            assert_eq!(metric, "Throughput");
            assert_eq!(*n, 1);
        }
        e => panic!("expected InsufficientSamples, got {e:?}"),
    }
    let stderr = ColumnKey::plain("ThroughputStdErr");
    assert_eq!(outcome.summary.get(&2, &ColumnKey::plain("Throughput")), Some(30.));
    assert_eq!(outcome.summary.get(&2, &stderr), None);
    assert!(outcome.summary.get(&1, &stderr).is_some());

    // absent in the file, too, not 0 or NaN
    let written = std::fs::read_to_string(&outcome.summary_path)?;
    assert!(written.lines().any(|l| l == "2,30,"), "{written}");
    Ok(())
}

#[test]
fn fallback_exhaustion_writes_nothing() -> Result<()> {
    let base = tempfile::tempdir()?;
    let run = base.path().join("1");
    std::fs::create_dir_all(&run)?;
    std::fs::write(
        run.join("exp_log.json"),
        r#"{"timestamps": {"start": 1700000000, "end": 1700000600}}"#,
    )?;
    let mut ctx = ctx();
    ctx.config.metrics_db.url = "127.0.0.1:1".into();
    ctx.config.metrics_db.fallback_urls = vec!["127.0.0.1:2".into()];
    ctx.config.metrics_db.timeout_s = 2;

    let e = process_experiment_path(&ctx, &run).unwrap_err();
    assert!(matches!(
        PipelineError::find(&e),
        Some(PipelineError::ConnectionExhausted { .. })
    ));
    let mut entries: Vec<String> = std::fs::read_dir(&run)?
        .map(|e| -> Result<String> { Ok(e?.file_name().to_string_lossy().into_owned()) })
        .collect::<Result<_>>()?;
    entries.sort();
    assert_eq!(entries, ["exp_log.json"]);
    Ok(())
}

#[test]
fn missing_path() {
    let e = process_experiment_path(&ctx(), Path::new("/nonexistent/experiments/x")).unwrap_err();
    match PipelineError::find(&e) {
        Some(e @ PipelineError::PathNotFound { .. }) => assert_eq!(e.kind_name(), "PathNotFound"),
        _ => panic!("expected PathNotFound, got {e:?}"),
    }
}

#[test]
fn unknown_plot_tag() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let e = PlotRegistry::default()
        .generate(
            &PlotData::Series(vec![Series {
                label: "x".into(),
                points: vec![],
            }]),
            "surface",
            &PlotOptions::new("surface.png"),
            dir.path(),
        )
        .unwrap_err();
    assert!(matches!(
        PipelineError::find(&e),
        Some(PipelineError::UnknownStrategy { kind: "plot", .. })
    ));
    Ok(())
}
