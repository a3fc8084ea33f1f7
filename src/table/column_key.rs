use std::fmt::Display;

use anyhow::{anyhow, Result};
use kstring::KString;

/// Composite column label: metric name, task name, subtask index.
/// Plain columns (derived metrics, statistics) have neither task nor
/// subtask; "sum across subtasks" columns have a task but no
/// subtask.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnKey {
    pub metric: KString,
    pub task: Option<KString>,
    pub subtask: Option<u32>,
}

impl ColumnKey {
    pub fn new(metric: KString, task: Option<KString>, subtask: Option<u32>) -> Self {
        Self {
            metric,
            task,
            subtask,
        }
    }

    pub fn plain(metric: &str) -> Self {
        Self::new(KString::from_ref(metric), None, None)
    }

    pub fn per_subtask(metric: &str, task: &str, subtask: u32) -> Self {
        Self::new(
            KString::from_ref(metric),
            Some(KString::from_ref(task)),
            Some(subtask),
        )
    }

    pub fn task_total(metric: &str, task: &str) -> Self {
        Self::new(KString::from_ref(metric), Some(KString::from_ref(task)), None)
    }

    pub fn is_plain(&self) -> bool {
        self.task.is_none() && self.subtask.is_none()
    }

    /// The three header cells used in delimited files.
    pub fn to_header_cells(&self) -> [String; 3] {
        [
            self.metric.to_string(),
            self.task.as_deref().unwrap_or("").to_string(),
            self.subtask.map(|s| s.to_string()).unwrap_or_default(),
        ]
    }

    /// Inverse of `to_header_cells`; missing levels are treated as
    /// empty.
    pub fn from_header_cells(metric: &str, task: &str, subtask: &str) -> Result<Self> {
        if metric.is_empty() {
            return Err(anyhow!("empty metric name in column header"));
        }
        let task = (!task.is_empty()).then(|| KString::from_ref(task));
        let subtask = if subtask.is_empty() {
            None
        } else {
            Some(
                subtask
                    .parse()
                    .map_err(|e| anyhow!("invalid subtask index {subtask:?}: {e}"))?,
            )
        };
        Ok(Self::new(KString::from_ref(metric), task, subtask))
    }
}

impl Display for ColumnKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            metric,
            task,
            subtask,
        } = self;
        write!(f, "({metric}")?;
        if let Some(task) = task {
            write!(f, ", {task}")?;
        } else if subtask.is_some() {
            write!(f, ", -")?;
        }
        if let Some(subtask) = subtask {
            write!(f, ", {subtask}")?;
        }
        write!(f, ")")
    }
}
