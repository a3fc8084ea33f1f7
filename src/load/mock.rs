//! Deterministic synthetic data in the same shape as the metrics
//! database and file sources deliver, for tests.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use kstring::KString;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::{
    context::EvalContext,
    descriptor::{ExperimentDescriptor, ParallelismEvent, TimeWindow},
    metrics::{
        catalog::{default_catalog, THROUGHPUT_METRIC},
        processor::{MetricsProcessor, BUCKET_WIDTH_S, TIMESTAMP_INDEX_NAME},
        sample::MetricSample,
    },
    process::single::FINAL_DF_TABLE,
    table::{Table, TableIndex},
    utillib::logging::LogLevel,
};

pub const MOCK_SOURCE_TASK: &str = "Source:_Source";

#[derive(Debug, Clone, PartialEq)]
pub struct MockSource {
    pub seed: u64,
    pub operator_task: KString,
    /// Unix seconds of the first sample; a multiple of the bucket
    /// width
    pub start: u64,
    /// (parallelism, number of buckets) per segment, in order
    pub segments: Vec<(u32, u32)>,
    /// Mean records per second of one operator subtask
    pub rate_per_subtask: f64,
}

impl Default for MockSource {
    fn default() -> Self {
        Self {
            seed: 1,
            operator_task: KString::from_static("Map"),
            start: 1_700_000_000,
            segments: vec![(1, 40), (2, 40), (3, 40)],
            rate_per_subtask: 1000.,
        }
    }
}

impl MockSource {
    fn end(&self) -> u64 {
        let buckets: u64 = self.segments.iter().map(|(_, n)| u64::from(*n)).sum();
        self.start + buckets * BUCKET_WIDTH_S
    }

    /// A run descriptor matching the generated data.
    pub fn descriptor(&self) -> ExperimentDescriptor {
        let mut t = self.start;
        let mut parallelism_events = Vec::new();
        for (parallelism, buckets) in &self.segments {
            parallelism_events.push(ParallelismEvent {
                timestamp: t,
                parallelism: *parallelism,
            });
            t += u64::from(*buckets) * BUCKET_WIDTH_S;
        }
        let mut config = BTreeMap::new();
        config.insert(
            crate::descriptor::TASK_NAME_KEY.to_string(),
            serde_json::Value::from(self.operator_task.as_str()),
        );
        ExperimentDescriptor {
            window: TimeWindow {
                start: self.start,
                end: self.end(),
            },
            parallelism_events,
            config,
        }
    }

    /// Samples keyed by catalog name, one sample per bucket and
    /// series, labelled like the structured database encoding.
    pub fn samples(&self) -> BTreeMap<KString, Vec<MetricSample>> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        let op = self.operator_task.as_str();
        let mut raw: BTreeMap<KString, Vec<MetricSample>> = BTreeMap::new();
        let mut push = |metric: &str, sample: MetricSample| {
            raw.entry(KString::from_ref(metric)).or_default().push(sample);
        };
        let mut t = self.start;
        for (parallelism, buckets) in &self.segments {
            for _ in 0..*buckets {
                let ms = t * 1000 + 1000;
                let mut total = 0.;
                for subtask in 0..*parallelism {
                    let rate = self.rate_per_subtask * (1. + rng.gen_range(-0.05..0.05));
                    total += rate;
                    let busy = 600. + rng.gen_range(-50.0..50.0);
                    let backpressure = rng.gen_range(0.0..100.0);
                    push(
                        THROUGHPUT_METRIC,
                        MetricSample::new(ms, THROUGHPUT_METRIC, Some(op), Some(subtask), rate),
                    );
                    push(
                        "busyTimeMsPerSecond",
                        MetricSample::new(ms, "busyTimeMsPerSecond", Some(op), Some(subtask), busy),
                    );
                    push(
                        "hardBackPressuredTimeMsPerSecond",
                        MetricSample::new(
                            ms,
                            "hardBackPressuredTimeMsPerSecond",
                            Some(op),
                            Some(subtask),
                            backpressure,
                        ),
                    );
                }
                push(
                    THROUGHPUT_METRIC,
                    MetricSample::new(ms, THROUGHPUT_METRIC, Some(MOCK_SOURCE_TASK), Some(0), total),
                );
                push(
                    "JVM_CPU_Load",
                    MetricSample::new(ms, "JVM_CPU_Load", None, None, rng.gen_range(0.2..0.9)),
                );
                t += BUCKET_WIDTH_S;
            }
        }
        raw
    }

    /// The unified table built from `samples()`, as `final_df`, with
    /// the index (unix seconds, like the other sources) converted to
    /// `I`.
    pub fn tables<I: TableIndex + From<u32>>(&self) -> Result<BTreeMap<KString, Table<I>>> {
        let catalog = default_catalog();
        let processor = MetricsProcessor {
            catalog: &catalog,
            operator_task: &self.operator_task,
        };
        let ctx = EvalContext {
            log_level: LogLevel::Quiet,
            ..Default::default()
        };
        let table = processor.build_unified_table(&ctx, &self.samples(), &self.descriptor())?;
        let table = table.map_index(TIMESTAMP_INDEX_NAME, |ts| {
            let ts = u32::try_from(ts).map_err(|e| anyhow!("timestamp {ts} out of range: {e}"))?;
            Ok(I::from(ts))
        })?;
        let mut tables = BTreeMap::new();
        tables.insert(KString::from_static(FINAL_DF_TABLE), table);
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{column_key::ColumnKey, UnifiedTable};

    #[test]
    fn t_deterministic() -> Result<()> {
        let mock = MockSource::default();
        assert_eq!(mock.samples(), mock.samples());
        let a: BTreeMap<KString, UnifiedTable> = mock.tables()?;
        let b: BTreeMap<KString, UnifiedTable> = mock.tables()?;
        assert_eq!(a, b);

        let other = MockSource {
            seed: 2,
            ..MockSource::default()
        };
        assert_ne!(mock.samples(), other.samples());
        Ok(())
    }

    #[test]
    fn t_shape() -> Result<()> {
        let mock = MockSource::default();
        let tables: BTreeMap<KString, UnifiedTable> = mock.tables()?;
        let t = &tables["final_df"];
        let s = mock.start;
        assert_eq!(t.len(), 120);
        assert_eq!(t.index().next(), Some(&s));
        assert_eq!(t.parallelism_at(&s), Some(1));
        assert_eq!(t.parallelism_at(&(s + 200)), Some(2));
        assert_eq!(t.parallelism_at(&(s + 595)), Some(3));
        assert!(t.has_column(&ColumnKey::per_subtask(THROUGHPUT_METRIC, "Map", 2)));
        assert!(t.has_column(&ColumnKey::task_total(THROUGHPUT_METRIC, MOCK_SOURCE_TASK)));
        assert_eq!(
            t.get(&s, &ColumnKey::per_subtask(THROUGHPUT_METRIC, "Map", 1)),
            None
        );
        Ok(())
    }
}
