//! Error types for loading datasets and running queries.

use thiserror::Error;

use crate::data::model::ColumnType;

/// Failure while reading a dataset into memory. No partial dataset is ever
/// handed out alongside one of these.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file extension: .{0}")]
    UnsupportedFormat(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("file has no header row")]
    EmptyHeader,

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("row {row}: expected {expected} fields, found {found}")]
    ColumnCount {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("row {row}, column '{column}': '{value}' is not a valid {expected}")]
    TypeMismatch {
        row: usize,
        column: String,
        expected: ColumnType,
        value: String,
    },

    #[error("row {row}: {message}")]
    SchemaMismatch { row: usize, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

/// A filter or aggregation that cannot be answered against the dataset.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("column '{column}' has type {actual}, {message}")]
    TypeMismatch {
        column: String,
        actual: ColumnType,
        message: String,
    },

    #[error("invalid predicate on '{column}': {message}")]
    InvalidPredicate { column: String, message: String },

    #[error("overflow while summing '{0}'")]
    Overflow(String),
}

pub type LoadResult<T> = std::result::Result<T, LoadError>;
pub type QueryResult<T> = std::result::Result<T, QueryError>;
