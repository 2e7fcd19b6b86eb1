//! In-process record store
//!
//! Tables live behind a tokio mutex. Hash uniqueness is enforced like the SQL unique
//! constraint, transactions stage rows until commit, and failures can be injected
//! for snapshots and inserts.

use super::{table_columns, RecordStore, TableSnapshot, UploadTransaction};
use crate::error::{IngestError, IngestResult};
use crate::types::{FileType, HashedRecord, RecordHash, Value};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A committed row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub values: Vec<Value>,
    pub source_file: String,
    pub upload_timestamp: DateTime<Utc>,
    pub hash: RecordHash,
}

/// Transaction counters, for assertions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionCounts {
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<FileType, Vec<StoredRow>>,
    counts: TransactionCounts,
    /// Inserts fail once a transaction would stage more than this many rows
    fail_insert_after: Option<usize>,
    fail_snapshot: bool,
    /// Tables whose creation fails
    fail_tables: HashSet<FileType>,
}

impl MemoryState {
    fn has_hash(&self, file_type: FileType, hash: &RecordHash) -> bool {
        self.tables
            .get(&file_type)
            .is_some_and(|rows| rows.iter().any(|r| &r.hash == hash))
    }
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    schema: String,
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SCHEMA)
    }
}

impl MemoryStore {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Make every transaction fail once it would hold more than `rows` staged rows
    pub async fn fail_inserts_after(&self, rows: usize) {
        self.state.lock().await.fail_insert_after = Some(rows);
    }

    /// Make creating the given type's table fail
    pub async fn fail_ensure_table(&self, file_type: FileType) {
        self.state.lock().await.fail_tables.insert(file_type);
    }

    /// Make snapshots fail
    pub async fn fail_snapshots(&self, fail: bool) {
        self.state.lock().await.fail_snapshot = fail;
    }

    pub async fn row_count(&self, file_type: FileType) -> usize {
        self.state
            .lock()
            .await
            .tables
            .get(&file_type)
            .map_or(0, Vec::len)
    }

    pub async fn rows(&self, file_type: FileType) -> Vec<StoredRow> {
        self.state
            .lock()
            .await
            .tables
            .get(&file_type)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn table_exists(&self, file_type: FileType) -> bool {
        self.state.lock().await.tables.contains_key(&file_type)
    }

    pub async fn transaction_counts(&self) -> TransactionCounts {
        self.state.lock().await.counts
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn schema_name(&self) -> &str {
        &self.schema
    }

    async fn ensure_table(&self, file_type: FileType) -> IngestResult<()> {
        let mut state = self.state.lock().await;
        if state.fail_tables.contains(&file_type) {
            return Err(IngestError::Store(format!(
                "cannot create table {}",
                file_type.table_name()
            )));
        }
        state.tables.entry(file_type).or_default();
        Ok(())
    }

    async fn existing_hashes(
        &self,
        file_type: FileType,
        hashes: &[RecordHash],
    ) -> IngestResult<HashSet<RecordHash>> {
        let state = self.state.lock().await;
        let Some(rows) = state.tables.get(&file_type) else {
            return Ok(HashSet::new());
        };
        let wanted: HashSet<&RecordHash> = hashes.iter().collect();
        Ok(rows
            .iter()
            .filter(|r| wanted.contains(&r.hash))
            .map(|r| r.hash.clone())
            .collect())
    }

    async fn snapshot(&self, file_type: FileType) -> IngestResult<TableSnapshot> {
        let state = self.state.lock().await;
        if state.fail_snapshot {
            return Err(IngestError::Store(format!(
                "snapshot of {} is unavailable",
                file_type.table_name()
            )));
        }

        let columns = table_columns(file_type)
            .into_iter()
            .map(str::to_string)
            .collect();
        // Rows are never deleted, so the key is the row's position.
        let rows = state
            .tables
            .get(&file_type)
            .map(|rows| {
                rows.iter()
                    .enumerate()
                    .map(|(i, r)| {
                        std::iter::once((i + 1).to_string())
                            .chain(r.values.iter().map(Value::render))
                            .chain([
                                r.source_file.clone(),
                                r.upload_timestamp.to_rfc3339(),
                                r.hash.to_string(),
                            ])
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(TableSnapshot { columns, rows })
    }

    async fn begin(&self) -> IngestResult<Box<dyn UploadTransaction>> {
        self.state.lock().await.counts.begun += 1;
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    staged: Vec<(FileType, StoredRow)>,
}

impl MemoryTransaction {
    fn staged_has(&self, file_type: FileType, hash: &RecordHash) -> bool {
        self.staged
            .iter()
            .any(|(ft, row)| *ft == file_type && &row.hash == hash)
    }
}

#[async_trait]
impl UploadTransaction for MemoryTransaction {
    async fn insert(
        &mut self,
        file_type: FileType,
        source_file: &str,
        records: &[HashedRecord],
    ) -> IngestResult<u64> {
        let state = self.state.lock().await;
        if !state.tables.contains_key(&file_type) {
            return Err(IngestError::Store(format!(
                "table {} does not exist",
                file_type.table_name()
            )));
        }
        if let Some(limit) = state.fail_insert_after {
            if self.staged.len() + records.len() > limit {
                return Err(IngestError::Store("injected insert failure".to_string()));
            }
        }

        let now = Utc::now();
        let mut batch = Vec::with_capacity(records.len());
        for record in records {
            let duplicate = state.has_hash(file_type, &record.hash)
                || self.staged_has(file_type, &record.hash)
                || batch.iter().any(|r: &StoredRow| r.hash == record.hash);
            if duplicate {
                return Err(IngestError::Store(format!(
                    "duplicate record_hash {} in {}",
                    record.hash,
                    file_type.table_name()
                )));
            }
            batch.push(StoredRow {
                values: record.record.values.clone(),
                source_file: source_file.to_string(),
                upload_timestamp: now,
                hash: record.hash.clone(),
            });
        }
        drop(state);

        let inserted = batch.len() as u64;
        self.staged
            .extend(batch.into_iter().map(|row| (file_type, row)));
        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> IngestResult<()> {
        let MemoryTransaction { state, staged } = *self;
        let mut state = state.lock().await;

        // Another transaction may have committed the same hash in the meantime.
        if let Some((file_type, row)) = staged
            .iter()
            .find(|(ft, row)| state.has_hash(*ft, &row.hash))
        {
            return Err(IngestError::Store(format!(
                "duplicate record_hash {} in {} at commit",
                row.hash,
                file_type.table_name()
            )));
        }

        for (file_type, row) in staged {
            state.tables.entry(file_type).or_default().push(row);
        }
        state.counts.committed += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> IngestResult<()> {
        self.state.lock().await.counts.rolled_back += 1;
        Ok(())
    }
}
