//! One transaction per file

use crate::dedup::{DedupedSet, DEFAULT_LOOKUP_BATCH};
use crate::error::{IngestError, IngestResult};
use crate::storage::{RecordStore, UploadTransaction};
use crate::types::{FileStatus, HashedRecord, RecordHash, SourceFile, UploadResult};
use std::collections::HashSet;
use tracing::{error, info, warn};

/// Commits a file's fresh records as one unit or not at all
#[derive(Debug, Clone, Copy)]
pub struct TransactionalUploader {
    /// Rows per insert statement group
    batch_size: usize,
}

impl TransactionalUploader {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Insert `deduped.fresh` inside a single transaction
    ///
    /// Any failure rolls the whole file back and is reported in the result; it never
    /// propagates, so the caller can continue with other files. After a commit the
    /// inserted hashes are looked up again to confirm they are present.
    #[tracing::instrument(skip_all, fields(file = %file.path.display(), rows = deduped.fresh.len()))]
    pub async fn upload(
        &self,
        store: &dyn RecordStore,
        file: &SourceFile,
        deduped: &DedupedSet,
    ) -> UploadResult {
        let skipped = deduped.duplicate_count() as u64;
        let fail = |reason: String| {
            let err = IngestError::TransactionFailure {
                path: file.path.clone(),
                reason,
            };
            error!(error = %err, "Upload failed");
            let mut result = UploadResult::failed(
                file.path.clone(),
                Some(file.file_type),
                FileStatus::RolledBack,
                err,
            );
            result.rows_skipped_as_duplicate = skipped;
            result
        };

        let mut tx = match store.begin().await {
            Ok(tx) => tx,
            Err(e) => return fail(e.to_string()),
        };

        let inserted = match self.stage(tx.as_mut(), file, &deduped.fresh).await {
            Ok(inserted) => inserted,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed, the connection drops the transaction");
                }
                return fail(e.to_string());
            }
        };

        if let Err(e) = tx.commit().await {
            return fail(format!("commit failed: {e}"));
        }

        let verified = match verify(store, file, &deduped.fresh).await {
            Ok(verified) => verified,
            Err(e) => {
                warn!(error = %e, "Post-commit verification could not run");
                false
            }
        };

        info!(inserted, skipped, verified, "File committed");

        UploadResult {
            path: file.path.clone(),
            file_type: Some(file.file_type),
            status: FileStatus::Uploaded,
            succeeded: true,
            rows_inserted: inserted,
            rows_skipped_as_duplicate: skipped,
            error: None,
            verified: Some(verified),
        }
    }

    async fn stage(
        &self,
        tx: &mut dyn UploadTransaction,
        file: &SourceFile,
        records: &[HashedRecord],
    ) -> IngestResult<u64> {
        let source_file = file.display_name();
        let mut inserted = 0;
        for batch in records.chunks(self.batch_size) {
            inserted += tx.insert(file.file_type, &source_file, batch).await?;
        }
        Ok(inserted)
    }
}

/// Whether every given hash is present in the destination
async fn verify(
    store: &dyn RecordStore,
    file: &SourceFile,
    records: &[HashedRecord],
) -> IngestResult<bool> {
    let hashes: Vec<RecordHash> = records.iter().map(|r| r.hash.clone()).collect();
    let mut found: HashSet<RecordHash> = HashSet::with_capacity(hashes.len());
    for batch in hashes.chunks(DEFAULT_LOOKUP_BATCH) {
        found.extend(store.existing_hashes(file.file_type, batch).await?);
    }

    let missing = hashes.iter().filter(|h| !found.contains(*h)).count();
    if missing > 0 {
        error!(missing, "Committed records not found in destination");
    }
    Ok(missing == 0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hash::record_hash;
    use crate::storage::MemoryStore;
    use crate::types::{FileType, Record, Value};
    use std::path::PathBuf;

    fn source() -> SourceFile {
        SourceFile {
            path: PathBuf::from("/in/S1.tmb.tsv"),
            file_type: FileType::Tmb,
            raw_row_count: 5,
            checksum: "0".repeat(64),
        }
    }

    fn deduped(n: usize) -> DedupedSet {
        let fresh = (1..=n)
            .map(|i| {
                let record = Record {
                    row: i,
                    values: vec![
                        Value::Text(format!("S{i}")),
                        Value::Float(i as f64),
                        Value::Null,
                        Value::Null,
                    ],
                };
                let hash = record_hash(FileType::Tmb, &record);
                HashedRecord { record, hash }
            })
            .collect();
        DedupedSet {
            fresh,
            persisted_duplicates: 1,
            in_file_repeats: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_upload_commits_once() {
        let store = MemoryStore::default();
        store.ensure_table(FileType::Tmb).await.unwrap();

        let result = TransactionalUploader::new(2)
            .upload(&store, &source(), &deduped(5))
            .await;

        assert!(result.succeeded);
        assert_eq!(result.status, FileStatus::Uploaded);
        assert_eq!(result.rows_inserted, 5);
        assert_eq!(result.rows_skipped_as_duplicate, 1);
        assert_eq!(result.verified, Some(true));

        let rows = store.rows(FileType::Tmb).await;
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.source_file == "S1.tmb.tsv"));
        let counts = store.transaction_counts().await;
        assert_eq!((counts.begun, counts.committed), (1, 1));
    }

    #[tokio::test]
    async fn test_failure_on_last_batch_leaves_no_rows() {
        let store = MemoryStore::default();
        store.ensure_table(FileType::Tmb).await.unwrap();
        store.fail_inserts_after(4).await;

        let result = TransactionalUploader::new(2)
            .upload(&store, &source(), &deduped(5))
            .await;

        assert!(!result.succeeded);
        assert_eq!(result.status, FileStatus::RolledBack);
        assert_eq!(result.rows_inserted, 0);
        assert!(result.error.unwrap().contains("rolled back"));
        assert_eq!(store.row_count(FileType::Tmb).await, 0);
        assert_eq!(store.transaction_counts().await.rolled_back, 1);
    }
}
