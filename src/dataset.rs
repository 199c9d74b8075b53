use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::cell::{CellValue, Row};

/// Locally cached view of one session's dataset.
///
/// `columns` is ordered and duplicate-free, every row's keys are a subset of
/// `columns`, and a row's position is its identity for update/delete.
/// `version` increases on every change so callers can detect staleness.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct DatasetSnapshot {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Column name to backend dtype (`int64`, `float64`, `object`, ...).
    #[serde(default)]
    pub dtypes: BTreeMap<String, String>,
    #[serde(default)]
    pub version: u64,
}

impl DatasetSnapshot {
    /// Builds a snapshot from server data, dropping duplicate column names
    /// and any row keys that are not dataset columns.
    pub fn from_parts(columns: Vec<String>, rows: Vec<Row>, dtypes: BTreeMap<String, String>) -> Self {
        let mut seen = HashSet::new();
        let columns: Vec<String> = columns
            .into_iter()
            .filter(|c| seen.insert(c.clone()))
            .collect();

        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.retain(|key, _| seen.contains(key));
                row
            })
            .collect();

        DatasetSnapshot {
            columns,
            rows,
            dtypes,
            version: 0,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn cell(&self, row_index: usize, column: &str) -> Option<&CellValue> {
        self.rows.get(row_index).and_then(|row| row.get(column))
    }

    /// Replaces the whole snapshot with a freshly fetched one, keeping the
    /// version monotonic.
    pub fn replace(&mut self, fresh: DatasetSnapshot) {
        let version = self.version + 1;
        *self = fresh;
        self.version = version;
    }

    /// Merges one confirmed value into the row at `row_index`. Other fields
    /// of that row are left alone. Returns false when the row or column is
    /// no longer present locally.
    pub fn patch_cell(&mut self, row_index: usize, column: &str, value: CellValue) -> bool {
        if !self.has_column(column) {
            return false;
        }
        match self.rows.get_mut(row_index) {
            Some(row) => {
                row.insert(column.to_string(), value);
                self.version += 1;
                true
            }
            None => false,
        }
    }

    /// Removes the row at `row_index`, shifting later rows down by one.
    pub fn remove_row(&mut self, row_index: usize) -> Option<Row> {
        if row_index >= self.rows.len() {
            return None;
        }
        let removed = self.rows.remove(row_index);
        self.version += 1;
        Some(removed)
    }

    /// Removes `name` from the column list and from every row.
    pub fn remove_column(&mut self, name: &str) -> bool {
        let before = self.columns.len();
        self.columns.retain(|c| c != name);
        if self.columns.len() == before {
            return false;
        }
        for row in &mut self.rows {
            row.remove(name);
        }
        self.dtypes.remove(name);
        self.version += 1;
        true
    }

    /// Checks the snapshot invariants: unique column names and row keys
    /// drawn from the column list.
    pub fn is_consistent(&self) -> bool {
        let columns: HashSet<&str> = self.columns.iter().map(String::as_str).collect();
        columns.len() == self.columns.len()
            && self
                .rows
                .iter()
                .all(|row| row.keys().all(|k| columns.contains(k.as_str())))
    }
}
