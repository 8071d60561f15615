//! Query Executor
//!
//! Each query runs on the blocking pool with exclusive use of the dataset's
//! connection. A SQLite progress handler interrupts the statement once the
//! time budget is spent, and rows beyond the cap are never read.

use crate::dataset::Dataset;
use crate::error::ExecutionFailure;
use crate::execution::result::QueryResult;
use crate::execution_loop::error_classifier::ErrorClassifier;
use crate::validator::ValidatedQuery;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// SQLite VM instructions between deadline checks.
const PROGRESS_OPS: i32 = 1_000;

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a validated query against `dataset`. Only `ValidatedQuery` is
    /// accepted, so nothing unvalidated reaches the engine.
    pub async fn execute(
        &self,
        dataset: Arc<Dataset>,
        query: ValidatedQuery,
    ) -> Result<QueryResult, ExecutionFailure> {
        let timeout = self.timeout;
        let task = tokio::task::spawn_blocking(move || run(&dataset, query, timeout));
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(ExecutionFailure::RuntimeError {
                message: format!("query task failed: {}", e),
            }),
        }
    }
}

fn run(dataset: &Dataset, query: ValidatedQuery, timeout: Duration) -> Result<QueryResult, ExecutionFailure> {
    let started = Instant::now();
    let deadline = started + timeout;

    let conn = dataset.connection();
    conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
    let outcome = read_rows(&conn, query.sql(), query.row_cap());
    conn.progress_handler(PROGRESS_OPS, None::<fn() -> bool>);
    drop(conn);

    let elapsed = started.elapsed().as_millis() as u64;
    match outcome {
        Ok((columns, rows)) => {
            let row_count = rows.len();
            info!("Query returned {} rows in {}ms", row_count, elapsed);
            Ok(QueryResult {
                columns,
                rows,
                row_count,
                truncated: row_count as u64 >= query.row_cap(),
                row_cap: query.row_cap(),
                execution_time_ms: elapsed,
                candidate: query.into_candidate(),
            })
        }
        Err(e) => {
            let failure = ErrorClassifier::new().classify_execution(&e, timeout);
            warn!("Query failed after {}ms: {}", elapsed, failure);
            Err(failure)
        }
    }
}

type Rows = (Vec<String>, Vec<Map<String, Value>>);

fn read_rows(conn: &Connection, sql: &str, row_cap: u64) -> rusqlite::Result<Rows> {
    let mut stmt = conn.prepare(sql)?;
    let columns = unique_names(stmt.column_names());

    let mut out = Vec::new();
    let mut rows = stmt.query([])?;
    while (out.len() as u64) < row_cap {
        let row = match rows.next()? {
            Some(row) => row,
            None => break,
        };
        let mut record = Map::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            record.insert(name.clone(), to_json(row.get_ref(idx)?));
        }
        out.push(record);
    }
    Ok((columns, out))
}

/// Result rows are keyed by name, so a repeated name gets `_2`, `_3`, ...
fn unique_names(names: Vec<&str>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(names.len());
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let mut unique = name.to_string();
        let mut n = 2;
        while !seen.insert(unique.clone()) {
            unique = format!("{}_{}", name, n);
            n += 1;
        }
        out.push(unique);
    }
    out
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}
