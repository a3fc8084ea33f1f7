//! The per-run descriptor `exp_log.json`, written by the experiment
//! runner: query window, rescale events and the configuration the
//! run was started with.

use std::{collections::BTreeMap, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use kstring::KString;
use serde_json::Value;

use crate::{error::PipelineError, table::Timestamp};

pub const DESCRIPTOR_FILE_NAME: &str = "exp_log.json";

/// The runner's config key naming the monitored operator.
pub const TASK_NAME_KEY: &str = "experiment.task_name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct TimeWindow {
    /// Unix seconds
    pub start: Timestamp,
    /// Unix seconds
    pub end: Timestamp,
}

/// From `timestamp` on (unix seconds, inclusive), the operator runs
/// with `parallelism` instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParallelismEvent {
    pub timestamp: Timestamp,
    pub parallelism: u32,
}

/// The runner sometimes stores its config as an embedded JSON string.
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum RawConfig {
    Map(BTreeMap<String, Value>),
    Encoded(String),
}

#[derive(Debug, serde::Deserialize)]
struct RawDescriptor {
    timestamps: TimeWindow,
    #[serde(default)]
    parallelism_events: Vec<ParallelismEvent>,
    #[serde(default)]
    config: Option<RawConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentDescriptor {
    pub window: TimeWindow,
    /// Sorted by timestamp
    pub parallelism_events: Vec<ParallelismEvent>,
    pub config: BTreeMap<String, Value>,
}

impl ExperimentDescriptor {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let deserializer = &mut serde_json::Deserializer::from_str(s);
        let RawDescriptor {
            timestamps,
            mut parallelism_events,
            config,
        } = serde_path_to_error::deserialize(deserializer)?;

        if timestamps.end < timestamps.start {
            bail!(
                "end timestamp {} is before start timestamp {}",
                timestamps.end,
                timestamps.start
            )
        }
        if let Some(ev) = parallelism_events.iter().find(|ev| ev.parallelism == 0) {
            bail!("parallelism event at {} has parallelism 0", ev.timestamp)
        }
        parallelism_events.sort_by_key(|ev| ev.timestamp);

        let config = match config {
            None => BTreeMap::new(),
            Some(RawConfig::Map(map)) => map,
            Some(RawConfig::Encoded(s)) => serde_json::from_str(&s)
                .with_context(|| anyhow!("decoding the embedded `config` string"))?,
        };

        Ok(Self {
            window: timestamps,
            parallelism_events,
            config,
        })
    }

    /// Read `exp_log.json` from the run directory `run_dir`.
    pub fn load(run_dir: &Path) -> Result<Self> {
        let path = run_dir.join(DESCRIPTOR_FILE_NAME);
        let s = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::PathNotFound { path }.into())
            }
            Err(e) => return Err(e).with_context(|| anyhow!("reading {path:?}")),
        };
        Self::from_json_str(&s).with_context(|| anyhow!("parsing run descriptor {path:?}"))
    }

    /// Look up a dotted config key, either stored flat (`"a.b": x`)
    /// or nested (`"a": {"b": x}`).
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.config.get(key) {
            return Some(v);
        }
        let mut parts = key.split('.');
        let mut value = self.config.get(parts.next()?)?;
        for part in parts {
            value = value.as_object()?.get(part)?;
        }
        Some(value)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config_value(key)?.as_str()
    }

    /// The monitored operator's task name as it appears in the
    /// metric labels.
    pub fn operator_task(&self) -> Option<KString> {
        let name = self.config_str(TASK_NAME_KEY)?;
        Some(task_label_for(name))
    }

    /// The parallelism active at `t`: that of the last event at or
    /// before `t`.
    pub fn parallelism_at(&self, t: Timestamp) -> Option<u32> {
        let n = self.parallelism_events.partition_point(|ev| ev.timestamp <= t);
        n.checked_sub(1).map(|i| self.parallelism_events[i].parallelism)
    }
}

/// Windowed operators are chained with the watermark assigner in the
/// job graph, the metric label carries both names.
pub fn task_label_for(operator_name: &str) -> KString {
    if operator_name == "TumblingEventTimeWindows" {
        KString::from_static("TumblingEventTimeWindows____Timestamps_Watermarks")
    } else {
        KString::from_ref(operator_name)
    }
}
