//! Error types for the ingestion pipeline
//!
//! File-level failures end one file's processing and are recorded in that file's
//! report. Run-level failures stop the dispatch of further files. Row-level problems
//! are not errors at all: they are collected as [`RowError`](crate::types::RowError)
//! values and reported.

use crate::types::FileType;
use gdu_common::GduError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by ingestion stages
#[derive(Error, Debug)]
pub enum IngestError {
    /// No known file type's required columns are present in the header
    #[error("Unsupported file type for {}: header [{header}] matches no known schema", path.display())]
    UnsupportedFileType { path: PathBuf, header: String },

    /// The header lacks required columns for the detected type
    #[error("{file_type} file {} is missing required columns: {}", path.display(), missing.join(", "))]
    MissingRequiredColumns {
        path: PathBuf,
        file_type: FileType,
        missing: Vec<String>,
    },

    /// Strict validation rejected a file that has row-level errors
    #[error("Strict validation rejected {}: {error_count} row-level error(s)", path.display())]
    StrictValidation { path: PathBuf, error_count: usize },

    /// Table snapshot could not be taken or written
    #[error("Backup of table {table} failed: {reason}")]
    BackupFailure { table: String, reason: String },

    /// The destination table for a file's type could not be created
    #[error("Destination table {table} unavailable: {reason}")]
    TableUnavailable { table: String, reason: String },

    /// A file's transaction failed and was rolled back
    #[error("Transaction for {} rolled back: {reason}", path.display())]
    TransactionFailure { path: PathBuf, reason: String },

    /// Invalid run or database configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The run was cancelled before this file was started
    #[error("Run aborted: {0}")]
    RunAborted(String),

    /// A chunk worker panicked or was cancelled
    #[error("Chunk worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed delimited input: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failure reported by a non-SQL record store
    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] GduError),
}

impl IngestError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a backup failure for the given table
    pub fn backup(table: impl Into<String>, reason: impl ToString) -> Self {
        Self::BackupFailure {
            table: table.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error stops the whole run rather than a single file
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::BackupFailure { .. } | Self::Configuration(_) | Self::RunAborted(_)
        )
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
