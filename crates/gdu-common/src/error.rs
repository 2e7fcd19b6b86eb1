//! Error types shared across the GDU workspace

use thiserror::Error;

/// Result type alias for GDU common operations
pub type Result<T> = std::result::Result<T, GduError>;

/// Main error type for shared utilities
#[derive(Error, Debug)]
pub enum GduError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
