//! Conversion of raw metric series into the unified table of a run:
//! 5 second buckets, one column per (metric, task, subtask), explicit
//! sums across subtasks, and the `Parallelism` column.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use kstring::KString;

use crate::{
    context::EvalContext,
    debug,
    descriptor::ExperimentDescriptor,
    info,
    metrics::{
        catalog::{find_query, is_source_task, MetricQuery, Scope, THROUGHPUT_METRIC},
        sample::MetricSample,
    },
    table::{column_key::ColumnKey, Timestamp, UnifiedTable, PARALLELISM},
    warn,
};

pub const BUCKET_WIDTH_S: u64 = 5;

pub const TIMESTAMP_INDEX_NAME: &str = "Timestamp";

/// The start (unix seconds) of the bucket holding `timestamp_ms`.
pub fn bucket_of(timestamp_ms: u64) -> Timestamp {
    timestamp_ms / 1000 / BUCKET_WIDTH_S * BUCKET_WIDTH_S
}

#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    sum: f64,
    n: usize,
}

impl Mean {
    fn add(&mut self, v: f64) {
        if v.is_finite() {
            self.sum += v;
            self.n += 1;
        }
    }

    fn get(self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

/// (task, subtask); both `None` for series that end up in a plain
/// column.
type SeriesKey = (Option<KString>, Option<u32>);

pub struct MetricsProcessor<'t> {
    pub catalog: &'t [MetricQuery],
    /// Task label of the monitored operator
    pub operator_task: &'t str,
}

impl<'t> MetricsProcessor<'t> {
    fn series_key(&self, scope: Scope, sample: &MetricSample) -> Option<SeriesKey> {
        let Some(task) = &sample.task else {
            return Some((None, None));
        };
        match scope {
            Scope::Job => Some((None, None)),
            _ if task.as_str() == self.operator_task => {
                Some((Some(task.clone()), Some(sample.subtask.unwrap_or(0))))
            }
            Scope::SumAcrossSubtasks if is_source_task(task) => {
                Some((Some(task.clone()), Some(sample.subtask.unwrap_or(0))))
            }
            Scope::PerSubtask | Scope::SumAcrossSubtasks => None,
        }
    }

    /// The table for one metric: the bucket means of each series,
    /// plus the total columns if the metric is summed.
    fn metric_table(
        &self,
        ctx: &EvalContext,
        name: &str,
        samples: &[MetricSample],
    ) -> Result<UnifiedTable> {
        let scope = if let Some(query) = find_query(self.catalog, name) {
            query.scope
        } else {
            warn!(ctx, "metric {name:?} is not in the catalog, treating it as per subtask");
            Scope::PerSubtask
        };

        let mut series: BTreeMap<SeriesKey, BTreeMap<Timestamp, Mean>> = BTreeMap::new();
        let mut ignored = 0;
        for sample in samples {
            if let Some(key) = self.series_key(scope, sample) {
                series
                    .entry(key)
                    .or_default()
                    .entry(bucket_of(sample.timestamp_ms))
                    .or_default()
                    .add(sample.value);
            } else {
                ignored += 1;
            }
        }
        debug!(
            ctx,
            "metric {name}: {} series, {ignored} samples of other tasks ignored",
            series.len()
        );

        let mut table = UnifiedTable::new(TIMESTAMP_INDEX_NAME);
        let mut totals: BTreeMap<&KString, BTreeMap<Timestamp, f64>> = BTreeMap::new();
        for ((task, subtask), buckets) in &series {
            let column = match (task, subtask) {
                (None, _) => Some(ColumnKey::plain(name)),
                (Some(task), Some(subtask)) if task.as_str() == self.operator_task => {
                    Some(ColumnKey::per_subtask(name, task, *subtask))
                }
                // source subtasks only contribute to their total
                (Some(_), _) => None,
            };
            for (ts, mean) in buckets {
                let Some(value) = mean.get() else { continue };
                if let Some(column) = &column {
                    table.set(*ts, column, Some(value));
                }
                if let (Some(task), Scope::SumAcrossSubtasks) = (task, scope) {
                    *totals.entry(task).or_default().entry(*ts).or_default() += value;
                }
            }
        }
        for (task, buckets) in totals {
            let column = ColumnKey::task_total(name, task);
            for (ts, value) in buckets {
                table.set(ts, &column, Some(value));
            }
        }
        Ok(table)
    }

    /// Count of operator subtasks with a measured throughput, per
    /// row.
    fn counted_parallelism(&self, table: &UnifiedTable) -> Vec<(Timestamp, Option<f64>)> {
        let positions: Vec<usize> = table
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, k)| {
                k.metric.as_str() == THROUGHPUT_METRIC
                    && k.task.as_deref() == Some(self.operator_task)
                    && k.subtask.is_some()
            })
            .map(|(i, _)| i)
            .collect();
        table
            .rows()
            .map(|(ts, vals)| {
                let n = positions.iter().filter(|i| vals[**i].is_some()).count();
                (*ts, (n > 0).then_some(n as f64))
            })
            .collect()
    }

    /// `raw` maps metric names (as in the catalog) to their samples.
    /// Deterministic: the same input always gives the same table.
    pub fn build_unified_table(
        &self,
        ctx: &EvalContext,
        raw: &BTreeMap<KString, Vec<MetricSample>>,
        descriptor: &ExperimentDescriptor,
    ) -> Result<UnifiedTable> {
        let mut table = UnifiedTable::new(TIMESTAMP_INDEX_NAME);
        for (name, samples) in raw {
            let metric_table = self
                .metric_table(ctx, name, samples)
                .with_context(|| anyhow!("building table for metric {name:?}"))?;
            table = table.outer_join(metric_table)?;
        }

        let parallelism: Vec<(Timestamp, Option<f64>)> =
            if descriptor.parallelism_events.is_empty() {
                info!(
                    ctx,
                    "no parallelism events in run descriptor, counting active subtasks of {}",
                    self.operator_task
                );
                self.counted_parallelism(&table)
            } else {
                table
                    .index()
                    .map(|ts| (*ts, descriptor.parallelism_at(*ts).map(f64::from)))
                    .collect()
            };
        if parallelism.iter().all(|(_, p)| p.is_none()) {
            warn!(
                ctx,
                "parallelism of {} unknown for all {} rows",
                self.operator_task,
                table.len()
            );
        }
        let key = ColumnKey::plain(PARALLELISM);
        table.add_column(key.clone())?;
        for (ts, p) in parallelism {
            table.set(ts, &key, p);
        }
        Ok(table)
    }
}
