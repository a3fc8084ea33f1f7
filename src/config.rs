use std::path::{Path, PathBuf};

use anyhow::Result;
use kstring::KString;

use crate::{
    config_file::LoadConfigFile,
    metrics::catalog::{default_catalog, MetricQuery},
    utillib::home::home_dir,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(strum_macros::EnumString, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum MetricsFormat {
    /// Flat `name,timestamp,value` lines, no task/subtask labels;
    /// kept under `export/` next to the labelled samples
    Csv,
    /// One JSON object per series, with all labels
    Json,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct MetricsDbConfig {
    /// host:port (or full base URL) of the time series database
    pub url: String,
    /// Tried in this order after `url` failed to connect
    pub fallback_urls: Vec<String>,
    /// Query resolution in seconds
    pub step_s: u32,
    /// Extra raw encoding to keep; the unified table is always built
    /// from the json encoding
    pub format: MetricsFormat,
    pub timeout_s: u64,
    /// Replaces the built-in metric query catalog if given
    pub catalog: Option<Vec<MetricQuery>>,
}

impl Default for MetricsDbConfig {
    fn default() -> Self {
        Self {
            url: "localhost:8428".into(),
            fallback_urls: vec!["victoria-metrics:8428".into()],
            step_s: 5,
            format: MetricsFormat::Json,
            timeout_s: 30,
            catalog: None,
        }
    }
}

impl MetricsDbConfig {
    pub fn catalog(&self) -> Vec<MetricQuery> {
        self.catalog.clone().unwrap_or_else(default_catalog)
    }

    /// `url` followed by the fallbacks.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str()).chain(self.fallback_urls.iter().map(|s| s.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct TrimmingConfig {
    /// Seconds dropped after the start of each parallelism segment
    pub warmup_s: u64,
    /// Seconds dropped before the end of each parallelism segment
    pub cooldown_s: u64,
}

impl Default for TrimmingConfig {
    fn default() -> Self {
        Self {
            warmup_s: 60,
            cooldown_s: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    Sum,
    Mean,
}

/// A column computed per row from the matching source columns of the
/// unified table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerivedMetric {
    pub name: KString,
    /// Metric name as used in the unified table's column keys
    pub source: KString,
    /// Restrict to this task; `None` means the monitored operator
    pub task: Option<KString>,
    pub reduction: Reduction,
    #[serde(default = "one")]
    pub scale: f64,
}

fn one() -> f64 {
    1.
}

impl DerivedMetric {
    fn new(name: &str, source: &str, reduction: Reduction, scale: f64) -> Self {
        Self {
            name: KString::from_ref(name),
            source: KString::from_ref(source),
            task: None,
            reduction,
            scale,
        }
    }
}

pub fn default_derived_metrics() -> Vec<DerivedMetric> {
    vec![
        DerivedMetric::new("Throughput", "numRecordsInPerSecond", Reduction::Sum, 1.),
        DerivedMetric::new("BusyTime", "busyTimeMsPerSecond", Reduction::Mean, 1.),
        DerivedMetric::new(
            "BackpressureTime",
            "hardBackPressuredTimeMsPerSecond",
            Reduction::Mean,
            1.,
        ),
        // busy milliseconds per second of wall time
        DerivedMetric::new("BusyRatio", "busyTimeMsPerSecond", Reduction::Mean, 1e-3),
    ]
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct PlotsConfig {
    pub enabled: bool,
    /// Target throughput, drawn as a horizontal line
    pub workload_objective: Option<f64>,
    pub throughput_ylim: Option<(f64, f64)>,
    pub width: u32,
    pub height: u32,
}

impl Default for PlotsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workload_objective: None,
            throughput_ylim: None,
            width: 1200,
            height: 800,
        }
    }
}

/// Direct representation of the expeval config file
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct EvalConfig {
    /// Relative experiment paths are resolved against this directory
    /// (default: the current directory).
    pub experiments_base_dir: Option<PathBuf>,
    pub metrics_db: MetricsDbConfig,
    pub trimming: TrimmingConfig,
    /// Monitored operator, used when a run's descriptor does not name
    /// one
    pub operator_task: KString,
    pub derived_metrics: Vec<DerivedMetric>,
    pub plots: PlotsConfig,
    /// If true, a group directory that can't be classified is an
    /// error; if false, it is processed as a multi-run group after a
    /// warning.
    pub strict_dispatch: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            experiments_base_dir: None,
            metrics_db: Default::default(),
            trimming: Default::default(),
            operator_task: KString::from_static("TumblingEventTimeWindows____Timestamps_Watermarks"),
            derived_metrics: default_derived_metrics(),
            plots: Default::default(),
            strict_dispatch: true,
        }
    }
}

impl EvalConfig {
    pub fn resolve_experiment_path(&self, path: &Path) -> PathBuf {
        match &self.experiments_base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_owned(),
        }
    }
}

impl LoadConfigFile for EvalConfig {
    fn default_config_path_without_suffix() -> Result<Option<PathBuf>> {
        let home = home_dir()?;
        Ok(Some(home.join(".expeval")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_file::ConfigBackend;

    #[test]
    fn t_partial_config() -> Result<()> {
        let config: EvalConfig = ConfigBackend::Json5.parse_config(
            "{ trimming: { warmup_s: 10 }, metrics_db: { format: 'csv' }, strict_dispatch: false }",
        )?;
        assert_eq!(config.trimming.warmup_s, 10);
        assert_eq!(config.trimming.cooldown_s, 30);
        assert_eq!(config.metrics_db.format, MetricsFormat::Csv);
        assert!(!config.strict_dispatch);
        assert_eq!(config.derived_metrics, default_derived_metrics());
        Ok(())
    }

    #[test]
    fn t_unknown_field() {
        let r: Result<EvalConfig> = ConfigBackend::Yaml.parse_config("trimmming:\n  warmup_s: 1\n");
        assert!(r.is_err());
    }

    #[test]
    fn t_yaml_derived_metric() -> Result<()> {
        let config: EvalConfig = ConfigBackend::Yaml.parse_config(
            "derived_metrics:\n  - name: Lag\n    source: records-lag-max\n    task: Source\n    reduction: sum\n",
        )?;
        assert_eq!(config.derived_metrics.len(), 1);
        assert_eq!(config.derived_metrics[0].scale, 1.);
        assert_eq!(config.derived_metrics[0].task.as_deref(), Some("Source"));
        Ok(())
    }

    #[test]
    fn t_urls_order() {
        let mut c = MetricsDbConfig::default();
        c.url = "a:1".into();
        c.fallback_urls = vec!["b:2".into(), "c:3".into()];
        assert_eq!(c.urls().collect::<Vec<_>>(), ["a:1", "b:2", "c:3"]);
    }

    #[test]
    fn t_resolve_path() {
        let mut c = EvalConfig::default();
        assert_eq!(c.resolve_experiment_path(Path::new("x")), PathBuf::from("x"));
        c.experiments_base_dir = Some("/data".into());
        assert_eq!(
            c.resolve_experiment_path(Path::new("x")),
            PathBuf::from("/data/x")
        );
        assert_eq!(
            c.resolve_experiment_path(Path::new("/abs")),
            PathBuf::from("/abs")
        );
    }
}
