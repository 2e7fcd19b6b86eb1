//! Deduplication against the destination and within a file

use crate::error::IngestResult;
use crate::storage::RecordStore;
use crate::types::{FileType, HashedRecord, RecordHash};
use std::collections::{HashMap, HashSet};

/// Hashes sent per membership query
pub const DEFAULT_LOOKUP_BATCH: usize = 5_000;

/// A record collapsed into an earlier row of the same file
#[derive(Debug, Clone, PartialEq)]
pub struct InFileRepeat {
    pub record: HashedRecord,
    /// Row of the occurrence that was kept
    pub first_row: usize,
}

/// A file's records split into those to insert and those skipped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupedSet {
    /// Records not yet persisted, in original row order
    pub fresh: Vec<HashedRecord>,
    /// Records whose hash already exists in the destination
    pub persisted_duplicates: usize,
    /// Repeats of an earlier row of the same file, in original row order
    pub in_file_repeats: Vec<InFileRepeat>,
}

impl DedupedSet {
    pub fn in_file_duplicates(&self) -> usize {
        self.in_file_repeats.len()
    }

    pub fn duplicate_count(&self) -> usize {
        self.persisted_duplicates + self.in_file_duplicates()
    }
}

/// Keep the first occurrence of each hash
pub fn collapse_in_file(records: Vec<HashedRecord>) -> (Vec<HashedRecord>, Vec<InFileRepeat>) {
    let mut first_rows: HashMap<RecordHash, usize> = HashMap::with_capacity(records.len());
    let mut unique = Vec::with_capacity(records.len());
    let mut repeats = Vec::new();

    for record in records {
        match first_rows.get(&record.hash) {
            Some(&first_row) => repeats.push(InFileRepeat { record, first_row }),
            None => {
                first_rows.insert(record.hash.clone(), record.record.row);
                unique.push(record);
            }
        }
    }
    (unique, repeats)
}

#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    lookup_batch: usize,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_BATCH)
    }
}

impl Deduplicator {
    pub fn new(lookup_batch: usize) -> Self {
        Self {
            lookup_batch: lookup_batch.max(1),
        }
    }

    /// Split records into fresh and duplicate with batched membership queries
    pub async fn partition(
        &self,
        store: &dyn RecordStore,
        file_type: FileType,
        records: Vec<HashedRecord>,
    ) -> IngestResult<DedupedSet> {
        let (unique, in_file_repeats) = collapse_in_file(records);

        let hashes: Vec<RecordHash> = unique.iter().map(|r| r.hash.clone()).collect();
        let mut existing = HashSet::new();
        for batch in hashes.chunks(self.lookup_batch) {
            existing.extend(store.existing_hashes(file_type, batch).await?);
        }

        let before = unique.len();
        let fresh: Vec<HashedRecord> = unique
            .into_iter()
            .filter(|r| !existing.contains(&r.hash))
            .collect();
        let persisted_duplicates = before - fresh.len();

        tracing::debug!(
            file_type = %file_type,
            fresh = fresh.len(),
            persisted_duplicates,
            in_file_duplicates = in_file_repeats.len(),
            "Deduplicated records"
        );

        Ok(DedupedSet {
            fresh,
            persisted_duplicates,
            in_file_repeats,
        })
    }
}
