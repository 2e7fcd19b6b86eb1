//! Chunk partitioning and the bounded chunk worker pool
//!
//! Each chunk is coerced, validated and hashed independently. Workers share nothing
//! but the read-only [`FileContext`]; their results are merged by chunk offset, so
//! the merged output is identical whatever order the workers finish in.

use crate::coerce::{coerce_row, is_missing_token};
use crate::dropped::DroppedRow;
use crate::error::{IngestError, IngestResult};
use crate::hash::record_hash;
use crate::qc::ColumnStats;
use crate::schema::{check_row, ColumnMap};
use crate::types::{FileType, HashedRecord, RawRow, RowError};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Contiguous slice of a file's rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<T> {
    /// Position of the first item within the file
    pub offset: usize,
    pub items: Vec<T>,
}

impl<T> Chunk<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Split items into chunks of `chunk_size`, the last one possibly shorter
pub fn partition<T>(items: Vec<T>, chunk_size: usize) -> Vec<Chunk<T>> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size.min(items.len()));
    let mut offset = 0;

    for (i, item) in items.into_iter().enumerate() {
        if current.len() == chunk_size {
            chunks.push(Chunk {
                offset,
                items: std::mem::take(&mut current),
            });
            offset = i;
        }
        current.push(item);
    }
    if !current.is_empty() {
        chunks.push(Chunk {
            offset,
            items: current,
        });
    }

    chunks
}

/// Read-only inputs every chunk worker needs
#[derive(Debug, Clone)]
pub struct FileContext {
    pub file_type: FileType,
    pub columns: ColumnMap,
    /// Fallback sample id taken from the file name
    pub file_stem: String,
}

/// Output of one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedChunk {
    pub offset: usize,
    pub records: Vec<HashedRecord>,
    pub errors: Vec<RowError>,
    pub warnings: Vec<RowError>,
    pub dropped: Vec<DroppedRow>,
    pub stats: ColumnStats,
}

/// Merged output of all chunks of one file, in original row order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessedFile {
    pub records: Vec<HashedRecord>,
    pub errors: Vec<RowError>,
    pub warnings: Vec<RowError>,
    /// Rejected rows with their raw cells, in row order
    pub dropped: Vec<DroppedRow>,
    pub stats: ColumnStats,
    /// Accepted record count of each chunk, by offset
    pub chunk_sizes: Vec<usize>,
}

impl ProcessedFile {
    /// Accepted rows, still known after the records have been handed on
    pub fn valid_row_count(&self) -> usize {
        self.chunk_sizes.iter().sum()
    }
}

/// Coerce, validate and hash every row of one chunk
pub fn process_chunk(ctx: &FileContext, chunk: Chunk<RawRow>) -> ProcessedChunk {
    let schema = ctx.file_type.schema();
    let mut records = Vec::with_capacity(chunk.len());
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut dropped = Vec::new();
    let mut stats = ColumnStats::default();

    for raw in &chunk.items {
        for field in ctx.columns.mapped_fields() {
            let spec = &schema.fields[field];
            let text = ctx
                .columns
                .column(field)
                .and_then(|col| raw.fields.get(col))
                .map(String::as_str)
                .unwrap_or("");
            stats.count_missing(spec.name, is_missing_token(spec.kind, text));
        }

        let coerced = coerce_row(schema, &ctx.columns, raw, &ctx.file_stem);
        warnings.extend(coerced.warnings);

        let Some(record) = coerced.record else {
            dropped.push(DroppedRow::rejected(schema, &ctx.columns, raw, &coerced.errors));
            errors.extend(coerced.errors);
            continue;
        };
        errors.extend(coerced.errors);
        let violations = check_row(schema, &record);
        if !violations.is_empty() {
            dropped.push(DroppedRow::rejected(schema, &ctx.columns, raw, &violations));
            errors.extend(violations);
            continue;
        }

        stats.observe(schema, &record);
        let hash = record_hash(ctx.file_type, &record);
        records.push(HashedRecord { record, hash });
    }

    ProcessedChunk {
        offset: chunk.offset,
        records,
        errors,
        warnings,
        dropped,
        stats,
    }
}

/// Runs chunk work sequentially or across a bounded pool of blocking workers
#[derive(Debug, Clone, Copy)]
pub struct ChunkScheduler {
    workers: usize,
}

impl ChunkScheduler {
    pub fn sequential() -> Self {
        Self { workers: 1 }
    }

    pub fn parallel(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process all chunks of a file and merge the results by offset
    pub async fn run(
        &self,
        ctx: Arc<FileContext>,
        chunks: Vec<Chunk<RawRow>>,
    ) -> IngestResult<ProcessedFile> {
        let chunk_count = chunks.len();

        let processed: Vec<ProcessedChunk> = if self.workers == 1 {
            let ctx = Arc::clone(&ctx);
            tokio::task::spawn_blocking(move || {
                chunks
                    .into_iter()
                    .map(|chunk| process_chunk(&ctx, chunk))
                    .collect::<Vec<_>>()
            })
            .await?
        } else {
            let results: Vec<IngestResult<ProcessedChunk>> = stream::iter(chunks)
                .map(|chunk| {
                    let ctx = Arc::clone(&ctx);
                    async move {
                        tokio::task::spawn_blocking(move || process_chunk(&ctx, chunk))
                            .await
                            .map_err(IngestError::from)
                    }
                })
                .buffer_unordered(self.workers)
                .collect()
                .await;
            results.into_iter().collect::<IngestResult<_>>()?
        };

        tracing::debug!(
            file_type = %ctx.file_type,
            chunks = chunk_count,
            workers = self.workers,
            "Chunk processing complete"
        );

        Ok(merge(processed))
    }
}

/// Single merge point: chunks are folded in offset order, never arrival order
fn merge(chunks: Vec<ProcessedChunk>) -> ProcessedFile {
    let ordered: BTreeMap<usize, ProcessedChunk> =
        chunks.into_iter().map(|c| (c.offset, c)).collect();

    let mut file = ProcessedFile::default();
    for (_, chunk) in ordered {
        file.chunk_sizes.push(chunk.records.len());
        file.records.extend(chunk.records);
        file.errors.extend(chunk.errors);
        file.warnings.extend(chunk.warnings);
        file.dropped.extend(chunk.dropped);
        file.stats.merge(chunk.stats);
    }
    file
}
