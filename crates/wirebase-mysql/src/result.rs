//! Results of executed statements.

use std::sync::Arc;

use wirebase_core::{ColumnInfo, Row};

use crate::types::ColumnDef;

/// Outcome of [`crate::MySqlConnection::execute`].
#[derive(Debug, Clone)]
pub enum ExecuteResult {
    /// The statement produced a result set
    Rows(ResultSet),
    /// The statement produced an OK packet
    Update(UpdateResult),
}

impl ExecuteResult {
    pub fn is_rows(&self) -> bool {
        matches!(self, ExecuteResult::Rows(_))
    }

    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            ExecuteResult::Rows(rs) => Some(rs),
            ExecuteResult::Update(_) => None,
        }
    }

    pub fn into_rows(self) -> Option<ResultSet> {
        match self {
            ExecuteResult::Rows(rs) => Some(rs),
            ExecuteResult::Update(_) => None,
        }
    }

    pub fn update(&self) -> Option<&UpdateResult> {
        match self {
            ExecuteResult::Update(u) => Some(u),
            ExecuteResult::Rows(_) => None,
        }
    }

    /// Affected rows for an update, 0 for a result set.
    pub fn affected_rows(&self) -> u64 {
        self.update().map_or(0, |u| u.affected_rows)
    }

    /// Warnings reported by the server for this statement.
    pub fn warning_count(&self) -> u16 {
        match self {
            ExecuteResult::Rows(rs) => rs.warning_count,
            ExecuteResult::Update(u) => u.warning_count,
        }
    }
}

/// Contents of an OK packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warning_count: u16,
    /// Human-readable info string, e.g. `Rows matched: 1  Changed: 1  Warnings: 0`
    pub info: String,
}

/// A fully drained result set.
#[derive(Debug, Clone)]
pub struct ResultSet {
    columns: Vec<ColumnDef>,
    rows: Vec<Row>,
    /// Rows the server sent, including those dropped by `max_rows`
    total_rows: u64,
    status_flags: u16,
    warning_count: u16,
}

impl ResultSet {
    pub(crate) fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            total_rows: 0,
            status_flags: 0,
            warning_count: 0,
        }
    }

    /// Shared column-name lookup for rows of this result.
    pub(crate) fn column_info(columns: &[ColumnDef]) -> Arc<ColumnInfo> {
        Arc::new(ColumnInfo::new(
            columns.iter().map(|c| c.name.clone()).collect(),
        ))
    }

    /// Is there room for another row under `max_rows`?
    pub(crate) fn accepts(&self, max_rows: Option<usize>) -> bool {
        max_rows.is_none_or(|max| self.rows.len() < max)
    }

    pub(crate) fn push(&mut self, row: Row) {
        self.total_rows += 1;
        self.rows.push(row);
    }

    /// Count a row that was drained but not kept.
    pub(crate) fn skip_row(&mut self) {
        self.total_rows += 1;
    }

    pub(crate) fn finish(&mut self, status_flags: u16, warning_count: u16) {
        self.status_flags = status_flags;
        self.warning_count = warning_count;
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows the server sent.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Were rows dropped because of `max_rows`?
    pub fn is_truncated(&self) -> bool {
        self.total_rows > self.rows.len() as u64
    }

    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    pub fn warning_count(&self) -> u16 {
        self.warning_count
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// One row of `SHOW WARNINGS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// `Note`, `Warning` or `Error`
    pub level: String,
    pub code: u16,
    pub message: String,
}
