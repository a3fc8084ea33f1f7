//! Loading experiment data. The strategies are closed sets: tables
//! come from files or the mock, raw samples from the metrics database
//! or the mock.

pub mod file;
pub mod metrics_db;
pub mod mock;

use std::collections::BTreeMap;

use anyhow::Result;
use kstring::KString;

use crate::{
    context::EvalContext,
    metrics::{catalog::MetricQuery, sample::MetricSample},
    table::{Table, TableIndex},
};

use self::{file::FileSource, metrics_db::MetricsDbSource, mock::MockSource};

#[derive(Debug, Clone)]
pub enum TableSource {
    File(FileSource),
    Mock(MockSource),
}

impl TableSource {
    /// Tables by name.
    pub fn load<I: TableIndex + From<u32>>(&self) -> Result<BTreeMap<KString, Table<I>>> {
        match self {
            TableSource::File(source) => source.load(),
            TableSource::Mock(source) => source.tables(),
        }
    }
}

#[derive(Debug)]
pub enum SampleSource<'c> {
    MetricsDb(MetricsDbSource<'c>),
    Mock(MockSource),
}

impl<'c> SampleSource<'c> {
    /// Samples by catalog entry name.
    pub fn load(
        &self,
        ctx: &EvalContext,
        catalog: &[MetricQuery],
    ) -> Result<BTreeMap<KString, Vec<MetricSample>>> {
        match self {
            SampleSource::MetricsDb(source) => source.load(ctx, catalog),
            SampleSource::Mock(source) => {
                let mut samples = source.samples();
                samples.retain(|name, _| catalog.iter().any(|q| &q.name == name));
                Ok(samples)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{export::export_table, table::UnifiedTable, utillib::logging::LogLevel};

    #[test]
    fn t_file_and_mock_agree() -> Result<()> {
        let mock = MockSource::default();
        let from_mock: BTreeMap<KString, UnifiedTable> = TableSource::Mock(mock).load()?;

        let dir = tempfile::tempdir()?;
        export_table(&from_mock["final_df"], &dir.path().join("final_df.csv"))?;
        let from_file: BTreeMap<KString, UnifiedTable> =
            TableSource::File(FileSource::new(dir.path(), &["final_df.csv"])).load()?;
        assert_eq!(from_file, from_mock);
        Ok(())
    }

    #[test]
    fn t_mock_samples_follow_catalog() -> Result<()> {
        let ctx = EvalContext {
            log_level: LogLevel::Quiet,
            ..Default::default()
        };
        let catalog: Vec<MetricQuery> = crate::metrics::catalog::default_catalog()
            .into_iter()
            .filter(|q| q.name.as_str() == "JVM_CPU_Load")
            .collect();
        let samples = SampleSource::Mock(MockSource::default()).load(&ctx, &catalog)?;
        assert_eq!(samples.keys().map(|k| k.as_str()).collect::<Vec<_>>(), ["JVM_CPU_Load"]);
        Ok(())
    }
}
