use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the pipeline.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid descriptor: {0}")]
    Descriptor(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown text encoding label: {0}")]
    UnknownEncoding(String),

    #[error("source file is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("country '{0}' not found in storage and no alias resolves it")]
    CountryNotFound(String),

    #[error("invalid row at line {line}: {reason}")]
    InvalidRow { line: u64, reason: String },

    #[error("cannot convert value '{raw}' at line {line} to {kind}")]
    InvalidValue {
        line: u64,
        raw: String,
        kind: &'static str,
    },

    #[error("metric is not initialized; run initialization in load mode first")]
    MetricNotInitialized,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors raised by a storage gateway.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether retrying the failed operation can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Database(err) => is_transient_sqlx(err),
            StorageError::Unavailable(_) => true,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| {
                // serialization failure, deadlock, aborted transaction,
                // connection exceptions, admin shutdown
                matches!(code.as_ref(), "40001" | "40P01" | "25P02" | "57P01")
                    || code.starts_with("08")
            })
            .unwrap_or(false),
        _ => false,
    }
}

/// Failure of a single attribute strategy, transform or period field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("'{value}' is not a known {vocabulary} label")]
    UnknownLabel { vocabulary: String, value: String },

    #[error("segment '{0}' has no label separator")]
    MissingLabel(String),

    #[error("'{value}' is not a valid {field}")]
    InvalidField { field: &'static str, value: String },

    #[error("empty input")]
    Empty,
}
