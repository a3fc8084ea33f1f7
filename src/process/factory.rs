//! Deciding whether an experiment directory is one run or a group of
//! them.

use std::path::Path;

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;

use crate::{descriptor::DESCRIPTOR_FILE_NAME, error::PipelineError};

use super::{
    grouped::{dir_name, is_numeric_name, is_run_dir, subdirs},
    single::FINAL_DF_FILE,
};

lazy_static! {
    static ref DATE_DAY: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex");
    static ref MULTI_RUN: Regex = Regex::new(r"^multi_run_\d+$").expect("valid regex");
    static ref RES_EXP: Regex = Regex::new(r"^res_exp_\w+$").expect("valid regex");
    static ref MULTI_EXP: Regex = Regex::new(r"^multi_exp_\d+(_\d+[a-zA-Z])?$").expect("valid regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    SingleRun,
    Group,
}

/// Classify the existing directory `path`: group names and
/// directories with runs below them are groups; numerically named
/// directories and those holding run data are single runs.
pub fn classify_folder(path: &Path) -> Result<FolderKind> {
    let name = dir_name(path);
    if DATE_DAY.is_match(name)
        || MULTI_RUN.is_match(name)
        || RES_EXP.is_match(name)
        || MULTI_EXP.is_match(name)
    {
        return Ok(FolderKind::Group);
    }
    if is_numeric_name(name) {
        return Ok(FolderKind::SingleRun);
    }
    let dirs = subdirs(path)?;
    if dirs
        .iter()
        .any(|d| is_numeric_name(dir_name(d)) || is_run_dir(d))
    {
        return Ok(FolderKind::Group);
    }
    if path.join(DESCRIPTOR_FILE_NAME).is_file() || path.join(FINAL_DF_FILE).is_file() {
        return Ok(FolderKind::SingleRun);
    }
    Err(PipelineError::StrategyUnresolved {
        path: path.to_owned(),
        reason: "neither a run directory nor a group of runs".into(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_classify_folder() -> Result<()> {
        let base = tempfile::tempdir()?;
        let b = base.path();
        for d in [
            "2024-05-01",
            "multi_run_3",
            "res_exp_cpu_2",
            "multi_exp_1_4b",
            "17",
            "named_run",
            "named_group/a",
            "empty",
        ] {
            std::fs::create_dir_all(b.join(d))?;
        }
        std::fs::write(b.join("named_run/exp_log.json"), "{}")?;
        std::fs::write(b.join("named_group/a/final_df.csv"), "")?;

        for (d, kind) in [
            ("2024-05-01", FolderKind::Group),
            ("multi_run_3", FolderKind::Group),
            ("res_exp_cpu_2", FolderKind::Group),
            ("multi_exp_1_4b", FolderKind::Group),
            ("17", FolderKind::SingleRun),
            ("named_run", FolderKind::SingleRun),
            ("named_group", FolderKind::Group),
        ] {
            assert_eq!(classify_folder(&b.join(d))?, kind, "{d}");
        }
        let e = classify_folder(&b.join("empty")).unwrap_err();
        assert!(matches!(
            PipelineError::find(&e),
            Some(PipelineError::StrategyUnresolved { .. })
        ));
        Ok(())
    }
}
