//! From an experiment path to its summaries: the folder is
//! classified as one run or a group, then processed accordingly.

pub mod factory;
pub mod grouped;
pub mod single;
pub mod strategies;

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::{context::EvalContext, error::PipelineError, info};

use self::{
    factory::{classify_folder, FolderKind},
    grouped::{GroupOutcome, GroupedExperimentProcessor},
    single::{SingleExperimentProcessor, SingleOutcome},
};

#[derive(Debug)]
pub enum ProcessOutcome {
    Single(SingleOutcome),
    Grouped(GroupOutcome),
}

impl ProcessOutcome {
    /// Everything written, data files first.
    pub fn artifacts(&self) -> Vec<&PathBuf> {
        match self {
            ProcessOutcome::Single(o) => std::iter::once(&o.summary_path).chain(&o.plots).collect(),
            ProcessOutcome::Grouped(o) => o.written.iter().chain(&o.plots).collect(),
        }
    }
}

/// Process the experiment at `path`; relative paths are taken
/// relative to the configured experiments base directory.
pub fn process_experiment_path(ctx: &EvalContext, path: &Path) -> Result<ProcessOutcome> {
    let path = ctx.config.resolve_experiment_path(path);
    if !path.is_dir() {
        return Err(PipelineError::PathNotFound { path }.into());
    }
    let kind = classify_folder(&path)?;
    info!(ctx, "{path:?} is a {kind:?}");
    match kind {
        FolderKind::SingleRun => Ok(ProcessOutcome::Single(
            SingleExperimentProcessor::new(ctx, &path).process()?,
        )),
        FolderKind::Group => Ok(ProcessOutcome::Grouped(
            GroupedExperimentProcessor::new(ctx, &path).process()?,
        )),
    }
}
