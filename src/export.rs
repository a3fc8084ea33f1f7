//! Writing tables and raw series to files. Parent directories are
//! created, existing files are overwritten.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use csv::WriterBuilder;
use kstring::KString;

use crate::{
    context::EvalContext,
    info,
    metrics::sample::MetricSample,
    table::{Table, TableIndex},
};

pub const RAW_EXPORT_DIR: &str = "export";

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| anyhow!("creating directory {dir:?}"))?;
        }
    }
    Ok(())
}

fn format_cell(value: Option<f64>) -> String {
    // `Display` for f64 gives the shortest representation that
    // parses back to the same value
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write `table` as delimited file; see `load::file` for the layout.
pub fn export_table<I: TableIndex>(table: &Table<I>, path: &Path) -> Result<()> {
    create_parent_dir(path)?;
    let mut writer = WriterBuilder::new()
        .flexible(false)
        .from_path(path)
        .with_context(|| anyhow!("creating {path:?}"))?;

    let header_rows = if table.columns().iter().all(|k| k.is_plain()) {
        1
    } else {
        3
    };
    let cells: Vec<[String; 3]> = table.columns().iter().map(|k| k.to_header_cells()).collect();
    for level in 0..header_rows {
        let first = if level == 0 { table.index_name() } else { "" };
        writer.write_record(
            std::iter::once(first).chain(cells.iter().map(|c| c[level].as_str())),
        )?;
    }
    for (index, values) in table.rows() {
        writer.write_record(
            std::iter::once(index.to_string()).chain(values.iter().copied().map(format_cell)),
        )?;
    }
    writer
        .flush()
        .with_context(|| anyhow!("writing {path:?}"))?;
    Ok(())
}

/// Same as `export_table`, plus an info message.
pub fn export_table_logged<I: TableIndex>(
    ctx: &EvalContext,
    table: &Table<I>,
    path: &Path,
) -> Result<()> {
    export_table(table, path)?;
    info!(ctx, "wrote {path:?} ({} rows)", table.len());
    Ok(())
}

#[derive(serde::Serialize)]
struct FlatSample<'s> {
    #[serde(rename = "Timestamp")]
    timestamp_ms: u64,
    #[serde(rename = "Task")]
    task: Option<&'s str>,
    #[serde(rename = "Subtask")]
    subtask: Option<u32>,
    #[serde(rename = "Value")]
    value: f64,
}

/// Write the raw series of each metric as
/// `<dir>/<metric>_export.csv` and `<dir>/<metric>_export.json`
/// (one sample per line). Returns the paths written.
pub fn export_raw_samples(
    ctx: &EvalContext,
    raw: &BTreeMap<KString, Vec<MetricSample>>,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| anyhow!("creating directory {dir:?}"))?;
    let mut written = Vec::new();
    for (metric, samples) in raw {
        let csv_path = dir.join(format!("{metric}_export.csv"));
        let mut writer = WriterBuilder::new()
            .from_path(&csv_path)
            .with_context(|| anyhow!("creating {csv_path:?}"))?;
        for sample in samples {
            writer.serialize(FlatSample {
                timestamp_ms: sample.timestamp_ms,
                task: sample.task.as_deref(),
                subtask: sample.subtask,
                value: sample.value,
            })?;
        }
        writer
            .flush()
            .with_context(|| anyhow!("writing {csv_path:?}"))?;
        written.push(csv_path);

        let json_path = dir.join(format!("{metric}_export.json"));
        let mut out = BufWriter::new(
            File::create(&json_path).with_context(|| anyhow!("creating {json_path:?}"))?,
        );
        for sample in samples {
            serde_json::to_writer(&mut out, sample)?;
            out.write_all(b"\n")?;
        }
        out.flush()
            .with_context(|| anyhow!("writing {json_path:?}"))?;
        written.push(json_path);
    }
    info!(ctx, "exported {} raw series to {dir:?}", raw.len());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        load::file::read_table,
        table::{column_key::ColumnKey, RunSummary, UnifiedTable, PARALLELISM},
        utillib::logging::LogLevel,
    };

    #[test]
    fn t_round_trip_multi_level() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut t = UnifiedTable::new("Timestamp");
        t.set(0, &ColumnKey::per_subtask("rate", "Map", 0), Some(1.25));
        t.set(5, &ColumnKey::task_total("rate", "Map"), Some(0.1 + 0.2));
        t.set(5, &ColumnKey::plain(PARALLELISM), Some(2.));
        let path = dir.path().join("nested/dir/final_df.csv");
        export_table(&t, &path)?;
        let back: UnifiedTable = read_table(&path)?;
        assert_eq!(back, t);

        // overwrite
        t.set(10, &ColumnKey::plain(PARALLELISM), Some(3.));
        export_table(&t, &path)?;
        assert_eq!(read_table::<u64>(&path)?, t);
        Ok(())
    }

    #[test]
    fn t_round_trip_plain() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut t = RunSummary::new(PARALLELISM);
        t.set(4, &ColumnKey::plain("Throughput"), Some(1e6 / 3.));
        t.set(2, &ColumnKey::plain("ThroughputStdErr"), None);
        let path = dir.path().join("mean_stderr.csv");
        export_table(&t, &path)?;
        let s = std::fs::read_to_string(&path)?;
        assert_eq!(s.lines().count(), 3);
        assert_eq!(read_table::<u32>(&path)?, t);
        Ok(())
    }

    #[test]
    fn t_label_index_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut t = Table::<KString>::new("Config");
        t.set(
            KString::from_static("4 TM, 8 TS/TM"),
            &ColumnKey::plain("Throughput_mean"),
            Some(5.),
        );
        let path = dir.path().join("box_plot_data.csv");
        export_table(&t, &path)?;
        assert_eq!(read_table::<KString>(&path)?, t);
        Ok(())
    }

    #[test]
    fn t_raw_export() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = EvalContext {
            log_level: LogLevel::Quiet,
            ..Default::default()
        };
        let mut raw = BTreeMap::new();
        raw.insert(
            KString::from_static("rate"),
            vec![
                MetricSample::new(1000, "rate", Some("Map"), Some(0), 1.),
                MetricSample::new(2000, "rate", None, None, 2.),
            ],
        );
        let written = export_raw_samples(&ctx, &raw, &dir.path().join(RAW_EXPORT_DIR))?;
        assert_eq!(written.len(), 2);
        let csv = std::fs::read_to_string(&written[0])?;
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Timestamp,Task,Subtask,Value");
        assert!(lines[1].starts_with("1000,Map,0,1"), "{csv}");
        assert!(lines[2].starts_with("2000,,,2"), "{csv}");
        let json = std::fs::read_to_string(&written[1])?;
        let back: Vec<MetricSample> = json
            .lines()
            .map(|line| serde_json::from_str(line))
            .collect::<Result<_, _>>()?;
        assert_eq!(back, raw[&KString::from_static("rate")]);
        Ok(())
    }
}
