//! Query Result - rows returned by the executor

use crate::candidate::SqlCandidate;
use serde::Serialize;
use serde_json::{Map, Value};

/// Tabular result of one validated query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// Column names in select-list order
    pub columns: Vec<String>,

    /// One JSON object per row, keyed by column name
    pub rows: Vec<Map<String, Value>>,

    pub row_count: usize,

    /// The result reached the row cap, so more rows may exist
    pub truncated: bool,

    pub row_cap: u64,

    /// Wall time spent inside the engine
    pub execution_time_ms: u64,

    /// The candidate that produced these rows, with any corrections applied
    pub candidate: SqlCandidate,
}

impl QueryResult {
    pub fn sql(&self) -> &str {
        &self.candidate.sql
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, in row order. Empty if the column is absent.
    pub fn column(&self, name: &str) -> Vec<&Value> {
        if !self.columns.iter().any(|c| c == name) {
            return Vec::new();
        }
        self.rows.iter().filter_map(|row| row.get(name)).collect()
    }
}
