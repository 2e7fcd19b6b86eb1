//! Destination store abstraction
//!
//! The pipeline talks to the destination only through [`RecordStore`] and the
//! [`UploadTransaction`] it hands out. [`PgStore`] is the PostgreSQL implementation;
//! [`MemoryStore`] keeps tables in process and supports fault injection.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, StoredRow};
pub use postgres::PgStore;

use crate::error::IngestResult;
use crate::types::{FileType, HashedRecord, RecordHash};
use async_trait::async_trait;
use std::collections::HashSet;

/// Full copy of a destination table, rendered as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Surrogate key, the first column of every destination table
pub const ID_COLUMN: &str = "id";

/// Columns of a destination table after the typed fields
pub const BOOKKEEPING_COLUMNS: &[&str] = &["source_file", "upload_timestamp", "record_hash"];

/// Every column of a file type's table, in table order
pub fn table_columns(file_type: FileType) -> Vec<&'static str> {
    std::iter::once(ID_COLUMN)
        .chain(file_type.schema().fields.iter().map(|f| f.name))
        .chain(BOOKKEEPING_COLUMNS.iter().copied())
        .collect()
}

/// Columns an insert supplies; the key and the upload timestamp are defaulted
pub fn insert_columns(file_type: FileType) -> Vec<&'static str> {
    file_type
        .schema()
        .fields
        .iter()
        .map(|f| f.name)
        .chain(["source_file", "record_hash"])
        .collect()
}

/// `<schema>.<type>_data`
pub fn qualified_table(schema: &str, file_type: FileType) -> String {
    format!("{schema}.{}", file_type.table_name())
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Destination schema name
    fn schema_name(&self) -> &str;

    /// Create the schema and the file type's table if they do not exist
    async fn ensure_table(&self, file_type: FileType) -> IngestResult<()>;

    /// Which of the given hashes are already persisted
    ///
    /// A table that does not exist yet holds no hashes.
    async fn existing_hashes(
        &self,
        file_type: FileType,
        hashes: &[RecordHash],
    ) -> IngestResult<HashSet<RecordHash>>;

    /// Read the whole table for a backup
    async fn snapshot(&self, file_type: FileType) -> IngestResult<TableSnapshot>;

    /// Open a transaction for one file's inserts
    async fn begin(&self) -> IngestResult<Box<dyn UploadTransaction>>;
}

/// An open transaction
///
/// Dropping it without calling [`commit`](UploadTransaction::commit) discards every
/// staged row.
#[async_trait]
pub trait UploadTransaction: Send {
    /// Stage records for insertion, returning the number of rows written
    async fn insert(
        &mut self,
        file_type: FileType,
        source_file: &str,
        records: &[HashedRecord],
    ) -> IngestResult<u64>;

    async fn commit(self: Box<Self>) -> IngestResult<()>;

    async fn rollback(self: Box<Self>) -> IngestResult<()>;
}
