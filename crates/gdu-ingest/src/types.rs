//! Core types shared by the pipeline stages

use crate::schema::FileSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// File types
// ============================================================================

/// Closed set of record layouts the pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Tmb,
    Cnv,
    Vcf,
    Maf,
    Expression,
    Fusion,
    Clinical,
    Bed,
}

impl FileType {
    /// Declaration order, also the final detection tie-break
    pub const ALL: [FileType; 8] = [
        FileType::Tmb,
        FileType::Cnv,
        FileType::Vcf,
        FileType::Maf,
        FileType::Expression,
        FileType::Fusion,
        FileType::Clinical,
        FileType::Bed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Tmb => "tmb",
            FileType::Cnv => "cnv",
            FileType::Vcf => "vcf",
            FileType::Maf => "maf",
            FileType::Expression => "expression",
            FileType::Fusion => "fusion",
            FileType::Clinical => "clinical",
            FileType::Bed => "bed",
        }
    }

    /// Unqualified destination table name
    pub fn table_name(&self) -> String {
        format!("{}_data", self.as_str())
    }

    pub fn schema(&self) -> &'static FileSchema {
        crate::schema::schema_for(*self)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Values and records
// ============================================================================

/// A typed field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view used by range rules and statistics
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Plain rendering for CSV backups and distinct-value counting
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Text(s) => s.clone(),
        }
    }
}

/// One typed row, values aligned with its schema's field order
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 1-based data row number in the source file
    pub row: usize,
    pub values: Vec<Value>,
}

impl Record {
    pub fn get(&self, schema: &FileSchema, field: &str) -> Option<&Value> {
        schema.field_index(field).and_then(|i| self.values.get(i))
    }
}

/// Hex-encoded SHA-256 content digest of a record's identifying fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordHash(String);

impl RecordHash {
    pub const HEX_LEN: usize = 64;

    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated record together with its digest
#[derive(Debug, Clone, PartialEq)]
pub struct HashedRecord {
    pub record: Record,
    pub hash: RecordHash,
}

/// An unparsed data row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based data row number
    pub row: usize,
    pub fields: Vec<String>,
}

// ============================================================================
// Row-level findings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    /// Missing required value or a value rule violation
    SchemaValidation,
    /// Text could not be converted to the field's type
    TypeCoercion,
}

/// A row-level finding `(row, field, reason)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub field: String,
    pub reason: String,
    pub kind: RowErrorKind,
}

impl RowError {
    pub fn validation(row: usize, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            row,
            field: field.into(),
            reason: reason.into(),
            kind: RowErrorKind::SchemaValidation,
        }
    }

    pub fn coercion(row: usize, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            row,
            field: field.into(),
            reason: reason.into(),
            kind: RowErrorKind::TypeCoercion,
        }
    }
}

// ============================================================================
// Files and outcomes
// ============================================================================

/// A scanned and detected input file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_type: FileType,
    pub raw_row_count: usize,
    /// SHA-256 of the file bytes as stored on disk
    pub checksum: String,
}

impl SourceFile {
    /// Value recorded in the `source_file` column
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Terminal state of one file within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Transaction committed
    Uploaded,
    /// Transaction failed and was rolled back
    RolledBack,
    /// Processed through deduplication without persisting
    DryRun,
    /// Failed before reaching upload
    Rejected,
    /// Never started because the run was aborted
    Skipped,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploaded => "uploaded",
            FileStatus::RolledBack => "rolled_back",
            FileStatus::DryRun => "dry_run",
            FileStatus::Rejected => "rejected",
            FileStatus::Skipped => "skipped",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FileStatus::Uploaded | FileStatus::DryRun)
    }
}

/// Outcome of one file's upload attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub path: PathBuf,
    pub file_type: Option<FileType>,
    pub status: FileStatus,
    pub succeeded: bool,
    pub rows_inserted: u64,
    pub rows_skipped_as_duplicate: u64,
    pub error: Option<String>,
    /// Whether every inserted hash was found after commit
    pub verified: Option<bool>,
}

impl UploadResult {
    pub fn failed(
        path: PathBuf,
        file_type: Option<FileType>,
        status: FileStatus,
        error: impl ToString,
    ) -> Self {
        Self {
            path,
            file_type,
            status,
            succeeded: false,
            rows_inserted: 0,
            rows_skipped_as_duplicate: 0,
            error: Some(error.to_string()),
            verified: None,
        }
    }
}
