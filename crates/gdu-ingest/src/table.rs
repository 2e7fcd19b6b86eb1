//! Destination table provisioning and pre-mutation backups

use crate::error::{IngestError, IngestResult};
use crate::storage::{qualified_table, RecordStore, TableSnapshot};
use crate::types::FileType;
use chrono::{DateTime, Utc};
use gdu_common::checksum::{compute_bytes_checksum, verify_file_checksum, ChecksumAlgorithm};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// A table snapshot written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableBackup {
    pub table: String,
    pub path: PathBuf,
    pub rows: usize,
    /// SHA-256 of the backup file
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// Backup file name: `<table>_backup_<YYYYmmdd_HHMMSS>.csv`
pub fn backup_file_name(file_type: FileType, at: DateTime<Utc>) -> String {
    format!(
        "{}_backup_{}.csv",
        file_type.table_name(),
        at.format("%Y%m%d_%H%M%S")
    )
}

fn render_csv(snapshot: &TableSnapshot) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&snapshot.columns)?;
    for row in &snapshot.rows {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

pub struct TableManager {
    store: Arc<dyn RecordStore>,
    /// `None` when backups are disabled for this run
    backup_dir: Option<PathBuf>,
    backed_up: Mutex<BTreeMap<FileType, TableBackup>>,
}

impl TableManager {
    pub fn new(store: Arc<dyn RecordStore>, backup_dir: Option<PathBuf>) -> Self {
        Self {
            store,
            backup_dir,
            backed_up: Mutex::new(BTreeMap::new()),
        }
    }

    /// Create schema and tables if missing; safe on a provisioned database
    ///
    /// A table that cannot be created only affects files of its own type, so every
    /// table is attempted and the failures are returned by type.
    pub async fn ensure_tables(&self, file_types: &[FileType]) -> BTreeMap<FileType, String> {
        let mut failed = BTreeMap::new();
        for file_type in file_types {
            if let Err(e) = self.store.ensure_table(*file_type).await {
                error!(
                    table = %qualified_table(self.store.schema_name(), *file_type),
                    error = %e,
                    "Could not create destination table"
                );
                failed.insert(*file_type, e.to_string());
            }
        }
        failed
    }

    /// Snapshot every given table once per run, before anything is written to it
    ///
    /// Tables already backed up by this manager are skipped. Any failure is a
    /// [`IngestError::BackupFailure`] and must stop the run.
    pub async fn backup_before_mutation(
        &self,
        file_types: &[FileType],
    ) -> IngestResult<Vec<TableBackup>> {
        let Some(dir) = &self.backup_dir else {
            return Ok(Vec::new());
        };

        let mut done = self.backed_up.lock().await;
        let mut created = Vec::new();
        for file_type in file_types {
            if done.contains_key(file_type) {
                continue;
            }
            let backup = self.backup_table(*file_type, dir).await.inspect_err(|e| {
                error!(table = %file_type.table_name(), error = %e, "Table backup failed");
            })?;
            done.insert(*file_type, backup.clone());
            created.push(backup);
        }

        Ok(created)
    }

    /// Backups taken so far, by table
    pub async fn backups(&self) -> Vec<TableBackup> {
        self.backed_up.lock().await.values().cloned().collect()
    }

    async fn backup_table(&self, file_type: FileType, dir: &Path) -> IngestResult<TableBackup> {
        let table = qualified_table(self.store.schema_name(), file_type);
        let fail = |reason: &dyn std::fmt::Display| IngestError::backup(&table, reason);

        let snapshot = self
            .store
            .snapshot(file_type)
            .await
            .map_err(|e| fail(&e))?;
        let bytes = render_csv(&snapshot).map_err(|e| fail(&e))?;
        let checksum = compute_bytes_checksum(&bytes, ChecksumAlgorithm::Sha256);

        let created_at = Utc::now();
        let path = dir.join(backup_file_name(file_type, created_at));
        tokio::fs::create_dir_all(dir).await.map_err(|e| fail(&e))?;
        tokio::fs::write(&path, &bytes).await.map_err(|e| fail(&e))?;

        let written = path.clone();
        let expected = checksum.clone();
        tokio::task::spawn_blocking(move || {
            verify_file_checksum(&written, &expected, ChecksumAlgorithm::Sha256)
        })
        .await
        .map_err(|e| fail(&e))?
        .map_err(|e| fail(&e))?;

        info!(
            table = %table,
            path = %path.display(),
            rows = snapshot.rows.len(),
            "Backup created"
        );

        Ok(TableBackup {
            table,
            path,
            rows: snapshot.rows.len(),
            checksum,
            created_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hash::record_hash;
    use crate::storage::MemoryStore;
    use crate::types::{HashedRecord, Record, Value};
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_backup_file_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            backup_file_name(FileType::Cnv, at),
            "cnv_data_backup_20240309_070501.csv"
        );
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::default();
        store.ensure_table(FileType::Tmb).await.unwrap();
        let record = Record {
            row: 1,
            values: vec![
                Value::Text("S1".into()),
                Value::Float(3.5),
                Value::Null,
                Value::Null,
            ],
        };
        let hash = record_hash(FileType::Tmb, &record);
        let mut tx = store.begin().await.unwrap();
        tx.insert(FileType::Tmb, "a.tsv", &[HashedRecord { record, hash }])
            .await
            .unwrap();
        tx.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_backup_once_per_table() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store().await;
        let manager = TableManager::new(Arc::new(store), Some(dir.path().to_path_buf()));

        let first = manager
            .backup_before_mutation(&[FileType::Tmb])
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].rows, 1);
        assert_eq!(first[0].table, "genomic.tmb_data");

        let content = std::fs::read_to_string(&first[0].path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,sample,tmb,binomial_low,binomial_high,source_file,upload_timestamp,record_hash"
        );
        assert!(lines.next().unwrap().starts_with("1,S1,3.5,,,a.tsv,"));

        let again = manager
            .backup_before_mutation(&[FileType::Tmb])
            .await
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(manager.backups().await.len(), 1);
    }

    #[tokio::test]
    async fn test_backup_failure_is_run_fatal() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store().await;
        store.fail_snapshots(true).await;
        let manager = TableManager::new(Arc::new(store), Some(dir.path().to_path_buf()));

        let err = manager
            .backup_before_mutation(&[FileType::Tmb])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::BackupFailure { .. }));
        assert!(err.is_run_fatal());
    }

    #[tokio::test]
    async fn test_ensure_tables_reports_failures_by_type() {
        let store = MemoryStore::default();
        store.fail_ensure_table(FileType::Vcf).await;
        let manager = TableManager::new(Arc::new(store.clone()), None);

        let failed = manager
            .ensure_tables(&[FileType::Tmb, FileType::Vcf, FileType::Cnv])
            .await;

        assert_eq!(failed.keys().copied().collect::<Vec<_>>(), vec![FileType::Vcf]);
        assert!(store.table_exists(FileType::Tmb).await);
        assert!(store.table_exists(FileType::Cnv).await);
        assert!(!store.table_exists(FileType::Vcf).await);
    }

    #[tokio::test]
    async fn test_disabled_backups_do_nothing() {
        let manager = TableManager::new(Arc::new(MemoryStore::default()), None);
        assert!(manager
            .backup_before_mutation(&[FileType::Cnv])
            .await
            .unwrap()
            .is_empty());
    }
}
