//! The error kinds that callers are expected to distinguish. They
//! travel inside `anyhow::Error` like all other errors; use
//! `PipelineError::find` to get at them.

use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
};

use crate::table::column_key::ColumnKey;

/// Context attached to errors from processing a run or group
/// directory, so the directory can be reported for error kinds that
/// don't carry a path themselves.
#[derive(Debug)]
pub struct InDirectory(pub PathBuf);

impl Display for InDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "processing {:?}", self.0)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("experiment path does not exist or is not usable: {path:?}")]
    PathNotFound { path: PathBuf },

    #[error("can't decide how to process {path:?}: {reason}")]
    StrategyUnresolved { path: PathBuf, reason: String },

    #[error("all metrics database URLs failed (tried {tried:?}), last error: {last_error}")]
    ConnectionExhausted {
        tried: Vec<String>,
        last_error: String,
    },

    #[error("column {column} is missing, needed for {needed_for}")]
    MissingColumn {
        column: ColumnKey,
        needed_for: String,
    },

    #[error(
        "insufficient data for {metric} at parallelism {parallelism}: \
         {n} sample(s), need at least 2"
    )]
    InsufficientSamples {
        parallelism: u32,
        metric: String,
        n: usize,
    },

    #[error("unknown {kind} strategy {tag:?}, available: {available:?}")]
    UnknownStrategy {
        kind: &'static str,
        tag: String,
        available: Vec<String>,
    },
}

impl PipelineError {
    /// Short name of the error kind, as shown by the command line
    /// tool.
    pub fn kind_name(&self) -> &'static str {
        match self {
            PipelineError::PathNotFound { .. } => "PathNotFound",
            PipelineError::StrategyUnresolved { .. } => "StrategyUnresolved",
            PipelineError::ConnectionExhausted { .. } => "ConnectionExhausted",
            PipelineError::MissingColumn { .. } => "MissingColumn",
            PipelineError::InsufficientSamples { .. } => "InsufficientSamples",
            PipelineError::UnknownStrategy { .. } => "UnknownStrategy",
        }
    }

    /// The path the error is about, if it is about one.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            PipelineError::PathNotFound { path } => Some(path),
            PipelineError::StrategyUnresolved { path, reason: _ } => Some(path),
            PipelineError::ConnectionExhausted { .. }
            | PipelineError::MissingColumn { .. }
            | PipelineError::InsufficientSamples { .. }
            | PipelineError::UnknownStrategy { .. } => None,
        }
    }

    /// Search the cause chain of `e` for a `PipelineError`, looking
    /// through any context layers added on the way up.
    pub fn find(e: &anyhow::Error) -> Option<&PipelineError> {
        e.chain().find_map(|cause| cause.downcast_ref::<PipelineError>())
    }

    /// The path to report for `e`: the one of its `PipelineError` if
    /// that has one, else the outermost `InDirectory` context.
    pub fn report_path(e: &anyhow::Error) -> Option<&Path> {
        Self::find(e)
            .and_then(|kind| kind.path())
            .map(|p| p.as_path())
            .or_else(|| e.downcast_ref::<InDirectory>().map(|d| d.0.as_path()))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context, Result};

    use super::*;

    fn missing_column() -> Result<()> {
        Err(PipelineError::MissingColumn {
            column: ColumnKey::plain("Throughput"),
            needed_for: "run summary".into(),
        })
        .with_context(|| anyhow!("summarizing"))
    }

    #[test]
    fn t_report_path() {
        let e = missing_column()
            .with_context(|| InDirectory("/runs/1".into()))
            .with_context(|| InDirectory("/runs".into()))
            .unwrap_err();
        assert_eq!(PipelineError::find(&e).map(|k| k.kind_name()), Some("MissingColumn"));
        assert_eq!(PipelineError::report_path(&e), Some(Path::new("/runs")));

        let e = anyhow::Error::from(PipelineError::PathNotFound {
            path: "/runs/9".into(),
        })
        .context(InDirectory("/runs".into()));
        assert_eq!(PipelineError::report_path(&e), Some(Path::new("/runs/9")));

        assert_eq!(PipelineError::report_path(&missing_column().unwrap_err()), None);
    }
}
