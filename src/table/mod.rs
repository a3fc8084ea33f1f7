//! The in-memory tabular structure shared by all pipeline stages:
//! rows keyed by an ordered, duplicate-free index (timestamp,
//! parallelism level, configuration label), columns addressed by
//! `ColumnKey`, values that may be absent.
//!
//! Absent is not zero: a missing value means "not measured". Non
//! finite values are stored as absent, too.

pub mod column_key;

use std::{collections::BTreeMap, fmt::Debug, fmt::Display};

use anyhow::{anyhow, bail, Result};
use itertools::{EitherOrBoth, Itertools};
use kstring::KString;

use crate::error::PipelineError;

use self::column_key::ColumnKey;

/// Row index types usable in a `Table`.
pub trait TableIndex: Ord + Clone + Debug + Display {
    fn parse_index(s: &str) -> Result<Self>;
}

macro_rules! numeric_table_index {
    { $($t:ty)* } => {
        $(
            impl TableIndex for $t {
                fn parse_index(s: &str) -> Result<Self> {
                    s.trim()
                        .parse()
                        .map_err(|e| anyhow!("invalid {} index value {s:?}: {e}", stringify!($t)))
                }
            }
        )*
    }
}

numeric_table_index! { u32 u64 }

impl TableIndex for KString {
    fn parse_index(s: &str) -> Result<Self> {
        if s.is_empty() {
            bail!("empty index label")
        }
        Ok(KString::from_ref(s))
    }
}

/// Seconds since the epoch, bucketed.
pub type Timestamp = u64;

/// One table per experiment run, keyed by bucketed timestamp, with a
/// `Parallelism` column.
pub type UnifiedTable = Table<Timestamp>;

/// Mean and standard error per parallelism level, for one run.
pub type RunSummary = Table<u32>;

pub const PARALLELISM: &str = "Parallelism";

#[derive(Debug, Clone, PartialEq)]
pub struct Table<I: TableIndex> {
    index_name: KString,
    columns: Vec<ColumnKey>,
    rows: BTreeMap<I, Vec<Option<f64>>>,
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

impl<I: TableIndex> Table<I> {
    pub fn new(index_name: &str) -> Self {
        Self {
            index_name: KString::from_ref(index_name),
            columns: Vec::new(),
            rows: BTreeMap::new(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// In increasing order.
    pub fn index(&self) -> impl Iterator<Item = &I> + '_ {
        self.rows.keys()
    }

    /// In increasing index order; the values are in `columns()` order.
    pub fn rows(&self) -> impl Iterator<Item = (&I, &[Option<f64>])> + '_ {
        self.rows.iter().map(|(i, vals)| (i, vals.as_slice()))
    }

    pub fn column_position(&self, key: &ColumnKey) -> Option<usize> {
        self.columns.iter().position(|k| k == key)
    }

    pub fn has_column(&self, key: &ColumnKey) -> bool {
        self.column_position(key).is_some()
    }

    /// Like `column_position`, but a missing column is a
    /// `MissingColumn` error.
    pub fn require_column(&self, key: &ColumnKey, needed_for: &str) -> Result<usize> {
        self.column_position(key).ok_or_else(|| {
            PipelineError::MissingColumn {
                column: key.clone(),
                needed_for: needed_for.into(),
            }
            .into()
        })
    }

    /// Returns the position of the column, adding it (absent in all
    /// existing rows) if necessary.
    pub fn ensure_column(&mut self, key: &ColumnKey) -> usize {
        if let Some(pos) = self.column_position(key) {
            pos
        } else {
            self.columns.push(key.clone());
            for vals in self.rows.values_mut() {
                vals.push(None);
            }
            self.columns.len() - 1
        }
    }

    /// Set a cell, creating row and column as needed.
    pub fn set(&mut self, index: I, key: &ColumnKey, value: Option<f64>) {
        let pos = self.ensure_column(key);
        let ncols = self.columns.len();
        let vals = self.rows.entry(index).or_insert_with(|| vec![None; ncols]);
        vals[pos] = finite(value);
    }

    pub fn get(&self, index: &I, key: &ColumnKey) -> Option<f64> {
        let pos = self.column_position(key)?;
        self.rows.get(index)?[pos]
    }

    pub fn row(&self, index: &I) -> Option<&[Option<f64>]> {
        self.rows.get(index).map(|v| v.as_slice())
    }

    /// Add a complete row; the index must not be present yet.
    pub fn insert_row(&mut self, index: I, values: Vec<Option<f64>>) -> Result<()> {
        if values.len() != self.columns.len() {
            bail!(
                "row {index} has {} values, but the table has {} columns",
                values.len(),
                self.columns.len()
            )
        }
        if self.rows.contains_key(&index) {
            bail!("duplicate index value {index}")
        }
        self.rows
            .insert(index, values.into_iter().map(finite).collect());
        Ok(())
    }

    /// Add a column with no values; error if it exists already.
    pub fn add_column(&mut self, key: ColumnKey) -> Result<()> {
        if self.has_column(&key) {
            bail!("duplicate column {key}")
        }
        self.ensure_column(&key);
        Ok(())
    }

    /// The values of the column `key`, in index order.
    pub fn column_values<'s>(
        &'s self,
        key: &ColumnKey,
    ) -> Result<impl Iterator<Item = (&'s I, Option<f64>)> + 's> {
        let pos = self.require_column(key, "reading column values")?;
        Ok(self.rows.iter().map(move |(i, vals)| (i, vals[pos])))
    }

    pub fn columns_matching(&self, pred: impl Fn(&ColumnKey) -> bool) -> Vec<ColumnKey> {
        self.columns.iter().filter(|k| pred(k)).cloned().collect()
    }

    pub fn retain_rows(&mut self, mut keep: impl FnMut(&I, &[Option<f64>]) -> bool) {
        self.rows.retain(|i, vals| keep(i, vals));
    }

    /// Outer join on the index: the result has the columns of `self`
    /// followed by those of `other`, rows for the union of both
    /// indices; cells without data stay absent. Both tables must not
    /// share columns.
    pub fn outer_join(self, other: Table<I>) -> Result<Table<I>> {
        for key in &other.columns {
            if self.has_column(key) {
                bail!("column {key} present on both sides of join")
            }
        }
        let left_width = self.columns.len();
        let right_width = other.columns.len();
        let mut columns = self.columns;
        columns.extend(other.columns);
        let rows = self
            .rows
            .into_iter()
            .merge_join_by(other.rows, |(a, _), (b, _)| a.cmp(b))
            .map(|eob| match eob {
                EitherOrBoth::Both((i, mut a), (_, b)) => {
                    a.extend(b);
                    (i, a)
                }
                EitherOrBoth::Left((i, mut a)) => {
                    a.resize(left_width + right_width, None);
                    (i, a)
                }
                EitherOrBoth::Right((i, b)) => {
                    let mut a = vec![None; left_width];
                    a.extend(b);
                    (i, a)
                }
            })
            .collect();
        Ok(Table {
            index_name: self.index_name,
            columns,
            rows,
        })
    }

    /// Convert the index values; the mapping must keep them unique.
    pub fn map_index<J: TableIndex>(
        self,
        index_name: &str,
        mut f: impl FnMut(I) -> Result<J>,
    ) -> Result<Table<J>> {
        let mut table = Table {
            index_name: KString::from_ref(index_name),
            columns: self.columns,
            rows: BTreeMap::new(),
        };
        for (i, vals) in self.rows {
            let j = f(i)?;
            if table.rows.insert(j.clone(), vals).is_some() {
                bail!("index mapping is not unique, {j} appears twice")
            }
        }
        Ok(table)
    }
}

impl UnifiedTable {
    /// The parallelism level active in the row at `index`, if known.
    pub fn parallelism_at(&self, index: &Timestamp) -> Option<u32> {
        let p = self.get(index, &ColumnKey::plain(PARALLELISM))?;
        (p >= 1.0).then_some(p as u32)
    }
}
