//! Schema Inference - Deterministic column typing for uploaded tables
//!
//! Each column is classified over its non-null cells with a fixed priority:
//! datetime > numeric > categorical > text. Column order is the header order
//! and no hash iteration order leaks into the result, so the same rows always
//! give the same `Schema`.

use crate::dataset::RawTable;
use crate::error::SchemaInferenceError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%m-%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
const NULL_MARKERS: &[&str] = &["", "na", "n/a", "null", "none", "nan"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Categorical,
    Datetime,
    Text,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Categorical => "categorical",
            ColumnType::Datetime => "datetime",
            ColumnType::Text => "text",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Every value parsed as an integer
    pub integral: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSummary {
    /// ISO-8601, same normalisation as the stored values
    pub earliest: String,
    pub latest: String,
    /// At least one value carried a time of day
    pub has_time: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub non_null: usize,
    pub nulls: usize,
    pub distinct: usize,
    /// Up to `sample_size` distinct values, first-seen order
    pub samples: Vec<String>,
    pub numeric: Option<NumericSummary>,
    pub dates: Option<DateSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    pub stats: ColumnStats,
}

/// Ordered column name -> inferred type mapping for a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    table: String,
    columns: Vec<ColumnSchema>,
    row_count: usize,
}

impl Schema {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Case-insensitive lookup.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn columns_of(&self, column_type: ColumnType) -> impl Iterator<Item = &ColumnSchema> + '_ {
        self.columns.iter().filter(move |c| c.column_type == column_type)
    }

    /// Compact description used in LLM prompts.
    pub fn describe(&self, sample_values: usize) -> String {
        let mut out = format!("Table: {} ({} rows)\nColumns:\n", self.table, self.row_count);
        for column in &self.columns {
            out.push_str(&format!("- {} ({})", column.name, column.column_type));
            if let Some(ref numeric) = column.stats.numeric {
                out.push_str(&format!(" range {}..{}", numeric.min, numeric.max));
            }
            if let Some(ref dates) = column.stats.dates {
                out.push_str(&format!(" from {} to {}", dates.earliest, dates.latest));
            }
            let samples: Vec<&str> = column
                .stats
                .samples
                .iter()
                .take(sample_values)
                .map(String::as_str)
                .collect();
            if !samples.is_empty() {
                out.push_str(&format!(" e.g. {}", samples.join(", ")));
            }
            out.push('\n');
        }
        out
    }
}

/// Schema inference engine
pub struct SchemaInference {
    categorical_ratio: f64,
    sample_size: usize,
}

impl Default for SchemaInference {
    fn default() -> Self {
        Self {
            categorical_ratio: 0.5,
            sample_size: 5,
        }
    }
}

impl SchemaInference {
    pub fn new(categorical_ratio: f64) -> Self {
        Self {
            categorical_ratio,
            ..Self::default()
        }
    }

    pub fn infer(&self, table: &str, raw: &RawTable) -> Result<Schema, SchemaInferenceError> {
        check_shape(raw)?;

        let columns = raw
            .headers()
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let cells: Vec<&str> = raw.rows().iter().map(|row| row[idx].trim()).collect();
                self.infer_column(name.trim(), &cells)
            })
            .collect();

        Ok(Schema {
            table: table.to_string(),
            columns,
            row_count: raw.rows().len(),
        })
    }

    fn infer_column(&self, name: &str, cells: &[&str]) -> ColumnSchema {
        let values: Vec<&str> = cells.iter().copied().filter(|c| !is_null_cell(c)).collect();

        let mut seen = HashSet::new();
        let mut samples = Vec::new();
        for value in &values {
            if seen.insert(*value) && samples.len() < self.sample_size {
                samples.push(value.to_string());
            }
        }

        let mut stats = ColumnStats {
            non_null: values.len(),
            nulls: cells.len() - values.len(),
            distinct: seen.len(),
            samples,
            numeric: None,
            dates: None,
        };

        let column_type = if values.is_empty() {
            ColumnType::Text
        } else if let Some(dates) = summarize_dates(&values) {
            stats.dates = Some(dates);
            ColumnType::Datetime
        } else if let Some(numeric) = summarize_numbers(&values) {
            stats.numeric = Some(numeric);
            ColumnType::Numeric
        } else if (stats.distinct as f64) <= self.categorical_ratio * values.len() as f64 {
            ColumnType::Categorical
        } else {
            ColumnType::Text
        };

        ColumnSchema {
            name: name.to_string(),
            column_type,
            stats,
        }
    }
}

fn check_shape(raw: &RawTable) -> Result<(), SchemaInferenceError> {
    if raw.headers().is_empty() {
        return Err(SchemaInferenceError::NoColumns);
    }
    let mut names = HashSet::new();
    for (idx, header) in raw.headers().iter().enumerate() {
        let name = header.trim();
        if name.is_empty() {
            return Err(SchemaInferenceError::BlankColumnName(idx));
        }
        if !names.insert(name.to_lowercase()) {
            return Err(SchemaInferenceError::DuplicateColumn(name.to_string()));
        }
    }
    if raw.rows().is_empty() {
        return Err(SchemaInferenceError::NoRows);
    }
    let expected = raw.headers().len();
    for (idx, row) in raw.rows().iter().enumerate() {
        if row.len() != expected {
            return Err(SchemaInferenceError::RaggedRow {
                row: idx + 1,
                expected,
                found: row.len(),
            });
        }
    }
    Ok(())
}

fn summarize_dates(values: &[&str]) -> Option<DateSummary> {
    let mut parsed = Vec::with_capacity(values.len());
    for value in values {
        parsed.push(parse_datetime(value)?);
    }
    let has_time = parsed.iter().any(|(_, timed)| *timed);
    let earliest = parsed.iter().map(|(dt, _)| *dt).min()?;
    let latest = parsed.iter().map(|(dt, _)| *dt).max()?;
    Some(DateSummary {
        earliest: format_datetime(earliest, has_time),
        latest: format_datetime(latest, has_time),
        has_time,
    })
}

fn summarize_numbers(values: &[&str]) -> Option<NumericSummary> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    let mut integral = true;
    for value in values {
        let number = parse_number(value)?;
        integral &= value.parse::<i64>().is_ok();
        min = min.min(number);
        max = max.max(number);
        sum += number;
    }
    Some(NumericSummary {
        min,
        max,
        mean: sum / values.len() as f64,
        integral,
    })
}

pub(crate) fn is_null_cell(cell: &str) -> bool {
    let cell = cell.trim();
    NULL_MARKERS.iter().any(|marker| cell.eq_ignore_ascii_case(marker))
}

/// Finite decimal numbers only; `inf`/`NaN` spellings are not numbers here.
pub(crate) fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim();
    let first = value.chars().next()?;
    if !(first.is_ascii_digit() || first == '-' || first == '+' || first == '.') {
        return None;
    }
    value.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Returns the parsed value and whether it carried a time of day.
pub(crate) fn parse_datetime(value: &str) -> Option<(NaiveDateTime, bool)> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some((dt.naive_utc(), true));
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some((dt, true));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| (dt, false));
        }
    }
    None
}

pub(crate) fn format_datetime(value: NaiveDateTime, has_time: bool) -> String {
    if has_time {
        value.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        value.format("%Y-%m-%d").to_string()
    }
}
