//! Tables from delimited files, as written by `export::export_table`.
//!
//! The header has one row, or three rows (metric, task, subtask) if
//! any column is not plain; continuation header rows have an empty
//! first cell, which data rows never have.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, StringRecord};
use kstring::KString;

use crate::{
    error::PipelineError,
    table::{column_key::ColumnKey, Table, TableIndex},
};

pub const MAX_HEADER_ROWS: usize = 3;

fn parse_cell(cell: &str) -> Result<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    let v: f64 = cell
        .parse()
        .map_err(|e| anyhow!("invalid number {cell:?}: {e}"))?;
    Ok(v.is_finite().then_some(v))
}

fn header_cell<'r>(record: Option<&'r StringRecord>, i: usize) -> &'r str {
    record.and_then(|r| r.get(i)).unwrap_or("")
}

/// Read one table; a missing file is a `PathNotFound` error.
pub fn read_table<I: TableIndex>(path: &Path) -> Result<Table<I>> {
    if !path.is_file() {
        return Err(PipelineError::PathNotFound {
            path: path.to_owned(),
        }
        .into());
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| anyhow!("opening {path:?}"))?;

    let mut records = reader.records();
    let first = records
        .next()
        .ok_or_else(|| anyhow!("file {path:?} is empty"))?
        .with_context(|| anyhow!("reading header of {path:?}"))?;
    let index_name = first.get(0).unwrap_or("");

    let mut headers = vec![first.clone()];
    let mut pending = None;
    for record in records.by_ref() {
        let record = record.with_context(|| anyhow!("reading {path:?}"))?;
        if headers.len() < MAX_HEADER_ROWS && record.get(0) == Some("") {
            headers.push(record);
        } else {
            pending = Some(record);
            break;
        }
    }
    if headers.len() == 2 {
        bail!("file {path:?}: expected 1 or 3 header rows, got 2")
    }

    let mut table = Table::new(index_name);
    for i in 1..first.len() {
        let key = ColumnKey::from_header_cells(
            header_cell(headers.first(), i),
            header_cell(headers.get(1), i),
            header_cell(headers.get(2), i),
        )
        .with_context(|| anyhow!("file {path:?}, column {i}"))?;
        table
            .add_column(key)
            .with_context(|| anyhow!("file {path:?}"))?;
    }

    let mut add_row = |record: StringRecord| -> Result<()> {
        let mut cells = record.iter();
        let index = I::parse_index(cells.next().unwrap_or(""))?;
        let values = cells.map(parse_cell).collect::<Result<Vec<_>>>()?;
        table.insert_row(index, values)
    };
    if let Some(record) = pending {
        add_row(record).with_context(|| anyhow!("file {path:?}"))?;
    }
    for record in records {
        let record = record.with_context(|| anyhow!("reading {path:?}"))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        add_row(record).with_context(|| anyhow!("file {path:?}, line {line}"))?;
    }
    Ok(table)
}

/// Named delimited files in one directory; the table names are the
/// file stems.
#[derive(Debug, Clone)]
pub struct FileSource {
    pub dir: PathBuf,
    pub file_names: Vec<String>,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>, file_names: &[&str]) -> Self {
        Self {
            dir: dir.into(),
            file_names: file_names.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn load<I: TableIndex>(&self) -> Result<BTreeMap<KString, Table<I>>> {
        if !self.dir.is_dir() {
            return Err(PipelineError::PathNotFound {
                path: self.dir.clone(),
            }
            .into());
        }
        let mut tables = BTreeMap::new();
        for file_name in &self.file_names {
            let path = self.dir.join(file_name);
            let name = Path::new(file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| anyhow!("invalid table file name {file_name:?}"))?;
            tables.insert(KString::from_ref(name), read_table(&path)?);
        }
        Ok(tables)
    }
}
