//! Dataset - uploaded rows materialised into a transient SQLite table
//!
//! A `Dataset` owns its inferred `Schema` and an in-memory SQLite connection
//! holding exactly one table. Nothing is written to disk.

use crate::error::{CoreError, Result, SchemaInferenceError};
use crate::schema::{
    format_datetime, is_null_cell, parse_datetime, parse_number, ColumnSchema, ColumnType, Schema,
    SchemaInference,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::io::Read;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;
use uuid::Uuid;

/// Loosely-typed rows as handed over by the upload handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Read CSV with a header row. Ragged rows are a decode error.
    pub fn from_csv_reader<R: Read>(reader: R) -> std::result::Result<Self, SchemaInferenceError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| SchemaInferenceError::Csv(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record.map_err(|e| SchemaInferenceError::Csv(e.to_string()))?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Ok(Self::from_csv_reader(file)?)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }
}

pub struct Dataset {
    id: Uuid,
    name: String,
    schema: Schema,
    conn: Mutex<Connection>,
    loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("table", &self.schema.table())
            .field("rows", &self.schema.row_count())
            .finish()
    }
}

impl Dataset {
    /// Infer the schema and load every row into a fresh in-memory table.
    pub fn from_raw(
        name: impl Into<String>,
        table: &str,
        raw: &RawTable,
        inference: &SchemaInference,
    ) -> Result<Self> {
        let name = name.into();
        let schema = inference.infer(table, raw)?;

        let mut conn = Connection::open_in_memory()?;
        create_table(&conn, &schema)?;
        insert_rows(&mut conn, &schema, raw)?;

        info!(
            "Loaded dataset '{}' into table '{}' ({} rows, {} columns)",
            name,
            table,
            schema.row_count(),
            schema.columns().len()
        );

        Ok(Self {
            id: Uuid::new_v4(),
            name,
            schema,
            conn: Mutex::new(conn),
            loaded_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Exclusive access to the backing store. A poisoned lock is recovered:
    /// the store is only ever read after loading.
    pub(crate) fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn sql_type(column: &ColumnSchema) -> &'static str {
    match column.column_type {
        ColumnType::Numeric => match column.stats.numeric {
            Some(ref n) if n.integral => "INTEGER",
            _ => "REAL",
        },
        _ => "TEXT",
    }
}

fn create_table(conn: &Connection, schema: &Schema) -> Result<()> {
    let columns: Vec<String> = schema
        .columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), sql_type(c)))
        .collect();
    let ddl = format!(
        "CREATE TABLE {} ({})",
        quote_ident(schema.table()),
        columns.join(", ")
    );
    conn.execute(&ddl, [])?;
    Ok(())
}

fn insert_rows(conn: &mut Connection, schema: &Schema, raw: &RawTable) -> Result<()> {
    let placeholders = vec!["?"; schema.columns().len()].join(", ");
    let insert = format!(
        "INSERT INTO {} VALUES ({})",
        quote_ident(schema.table()),
        placeholders
    );

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(&insert)?;
        for row in raw.rows() {
            let values = schema
                .columns()
                .iter()
                .zip(row.iter())
                .map(|(column, cell)| to_sql_value(column, cell))
                .collect::<Result<Vec<SqlValue>>>()?;
            stmt.execute(params_from_iter(values))?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn to_sql_value(column: &ColumnSchema, cell: &str) -> Result<SqlValue> {
    let cell = cell.trim();
    if is_null_cell(cell) {
        return Ok(SqlValue::Null);
    }
    let mismatch = || {
        CoreError::Store(format!(
            "value '{}' does not fit {} column '{}'",
            cell, column.column_type, column.name
        ))
    };
    match column.column_type {
        ColumnType::Numeric => {
            let integral = column.stats.numeric.as_ref().map_or(false, |n| n.integral);
            if integral {
                cell.parse::<i64>().map(SqlValue::Integer).map_err(|_| mismatch())
            } else {
                parse_number(cell).map(SqlValue::Real).ok_or_else(mismatch)
            }
        }
        ColumnType::Datetime => {
            let has_time = column.stats.dates.as_ref().map_or(false, |d| d.has_time);
            parse_datetime(cell)
                .map(|(dt, _)| SqlValue::Text(format_datetime(dt, has_time)))
                .ok_or_else(mismatch)
        }
        ColumnType::Categorical | ColumnType::Text => Ok(SqlValue::Text(cell.to_string())),
    }
}
