use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Schema inference error: {0}")]
    Schema(#[from] SchemaInferenceError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Raised by the upload path when raw rows cannot be turned into a schema.
/// Every variant is reported to callers as `unparseable_dataset`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaInferenceError {
    #[error("unparseable_dataset: no columns in header row")]
    NoColumns,

    #[error("unparseable_dataset: column {0} has a blank name")]
    BlankColumnName(usize),

    #[error("unparseable_dataset: duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("unparseable_dataset: row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("unparseable_dataset: dataset has no rows")]
    NoRows,

    #[error("unparseable_dataset: {0}")]
    Csv(String),
}

impl SchemaInferenceError {
    pub fn code(&self) -> &'static str {
        "unparseable_dataset"
    }
}

/// Typed cause of a failed generation attempt. The orchestrator records it in
/// the fallback decision and moves on to the next generator.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", content = "detail", rename_all = "snake_case")]
pub enum GenerationFailure {
    #[error("timeout: no response within {0}ms")]
    Timeout(u64),

    #[error("rate_limited: model endpoint returned 429")]
    RateLimited,

    #[error("unparseable: {0}")]
    Unparseable(String),

    #[error("invalid_columns: {}", .0.join(", "))]
    InvalidColumns(Vec<String>),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl GenerationFailure {
    pub fn code(&self) -> &'static str {
        match self {
            GenerationFailure::Timeout(_) => "timeout",
            GenerationFailure::RateLimited => "rate_limited",
            GenerationFailure::Unparseable(_) => "unparseable",
            GenerationFailure::InvalidColumns(_) => "invalid_columns",
            GenerationFailure::Unavailable(_) => "unavailable",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum ValidationRejection {
    #[error("unknown_column: '{0}' is not a column of the dataset")]
    UnknownColumn(String),

    #[error("unknown_table: '{0}' is not the dataset table")]
    UnknownTable(String),

    #[error("disallowed_statement: {0}")]
    DisallowedStatement(String),

    #[error("multi_statement: found {0} statements, only one is allowed")]
    MultiStatement(usize),
}

impl ValidationRejection {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationRejection::UnknownColumn(_) => "unknown_column",
            ValidationRejection::UnknownTable(_) => "unknown_table",
            ValidationRejection::DisallowedStatement(_) => "disallowed_statement",
            ValidationRejection::MultiStatement(_) => "multi_statement",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionFailure {
    #[error("timeout: query exceeded the {budget_ms}ms budget")]
    Timeout { budget_ms: u64 },

    #[error("runtime_error: {message}")]
    RuntimeError { message: String },
}

/// Error half of an `Answer`. Never raised as a fault, always returned with provenance.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum AnswerError {
    #[error("unknown dataset: {dataset_id}")]
    UnknownDataset { dataset_id: String },

    #[error("execution failed: {failure}")]
    Execution { failure: ExecutionFailure },

    #[error("no valid SQL candidate: {rejection}")]
    NoValidCandidate { rejection: ValidationRejection },
}
