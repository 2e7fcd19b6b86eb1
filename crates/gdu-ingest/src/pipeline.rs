//! Run coordinator
//!
//! A run scans the input directory, classifies every file up front so the affected
//! tables can be backed up before anything is written, then drives each file through
//! read → detect → header check → chunked coerce/validate/hash → dedup → upload and
//! records exactly one outcome per file. Files are dispatched with bounded concurrency;
//! outcomes are reported in scan order.

use crate::chunk::{partition, ChunkScheduler, FileContext, ProcessedFile};
use crate::config::{RunConfig, ValidationPolicy};
use crate::dedup::{DedupedSet, Deduplicator};
use crate::dropped::{DroppedExport, DroppedRecords, DroppedRow};
use crate::error::{IngestError, IngestResult};
use crate::notify::{JsonFileDispatcher, LogDispatcher, NotificationDispatcher, RunSummary};
use crate::qc::{FileReport, QcReportBuilder, RunReport};
use crate::schema::detect::detect_headerless;
use crate::schema::{detect, validate_header};
use crate::source::{self, file_stem, RawTable};
use crate::storage::{qualified_table, RecordStore};
use crate::table::{TableBackup, TableManager};
use crate::types::{FileStatus, FileType, SourceFile, UploadResult};
use crate::upload::TransactionalUploader;
use futures::stream::{self, StreamExt};
use gdu_common::checksum::{compute_file_checksum, ChecksumAlgorithm};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Abort reason of a run cancelled through its token
const CANCELLED: &str = "run cancelled";

/// Exit status of a run whose files all succeeded
pub const EXIT_OK: u8 = 0;
/// Exit status when at least one file failed
pub const EXIT_FILE_FAILURES: u8 = 1;
/// Exit status for an aborted run or invalid configuration
pub const EXIT_ABORTED: u8 = 2;

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    /// One result per scanned file, in scan order
    pub results: Vec<UploadResult>,
    pub report: RunReport,
    /// Where the QC report was written, if writing succeeded
    pub report_path: Option<PathBuf>,
    pub backups: Vec<TableBackup>,
    /// Rows left out of the upload, one file per table
    pub dropped_records: Vec<DroppedExport>,
    pub aborted: bool,
    pub abort_reason: Option<String>,
}

impl RunOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.succeeded)
    }

    pub fn exit_code(&self) -> u8 {
        if self.aborted {
            EXIT_ABORTED
        } else if self.all_succeeded() {
            EXIT_OK
        } else {
            EXIT_FILE_FAILURES
        }
    }
}

/// One file's dropped rows, in row order
struct FileDropped {
    file_type: FileType,
    source_file: String,
    rows: Vec<DroppedRow>,
}

impl FileDropped {
    fn new(source: &SourceFile, processed: &ProcessedFile, deduped: Option<&DedupedSet>) -> Self {
        let mut rows = processed.dropped.clone();
        if let Some(deduped) = deduped {
            rows.extend(deduped.in_file_repeats.iter().map(DroppedRow::repeated));
            rows.sort_by_key(|r| r.row);
        }
        Self {
            file_type: source.file_type,
            source_file: source.display_name(),
            rows,
        }
    }
}

struct FileOutcome {
    result: UploadResult,
    report: FileReport,
    dropped: Option<FileDropped>,
}

impl FileOutcome {
    /// A file that stopped before chunk processing
    fn stopped(
        path: &Path,
        source: Option<&SourceFile>,
        status: FileStatus,
        err: IngestError,
    ) -> Self {
        let result = UploadResult::failed(
            path.to_path_buf(),
            source.map(|s| s.file_type),
            status,
            err,
        );
        let report = FileReport::without_rows(&result, source);
        Self {
            result,
            report,
            dropped: None,
        }
    }

    fn skipped(path: &Path, reason: &str) -> Self {
        Self::stopped(
            path,
            None,
            FileStatus::Skipped,
            IngestError::RunAborted(reason.to_string()),
        )
    }
}

/// Detected type of a file, and whether its first line is data
fn classify(path: &Path, header: &[String]) -> IngestResult<(FileType, bool)> {
    match detect(path, header) {
        Ok(file_type) => Ok((file_type, false)),
        Err(e) => detect_headerless(path, header)
            .map(|file_type| (file_type, true))
            .ok_or(e),
    }
}

/// Checksum, read and classify one file
fn load_file(path: &Path) -> IngestResult<(SourceFile, RawTable)> {
    let checksum = compute_file_checksum(path, ChecksumAlgorithm::Sha256)?;
    let table = source::read_table(path)?;

    let (file_type, headerless) = classify(path, &table.header)?;
    let table = match file_type.schema().headerless_columns {
        Some(columns) if headerless => table.into_headerless(columns),
        _ => table,
    };

    let source = SourceFile {
        path: path.to_path_buf(),
        file_type,
        raw_row_count: table.rows.len(),
        checksum,
    };
    Ok((source, table))
}

pub struct Pipeline {
    config: RunConfig,
    store: Arc<dyn RecordStore>,
    dispatchers: Vec<Arc<dyn NotificationDispatcher>>,
    cancel: CancellationToken,
    scheduler: ChunkScheduler,
    deduplicator: Deduplicator,
    uploader: TransactionalUploader,
}

impl Pipeline {
    /// The store is the only handle to the destination; the caller owns its pool
    pub fn new(config: RunConfig, store: Arc<dyn RecordStore>) -> Self {
        let mut dispatchers: Vec<Arc<dyn NotificationDispatcher>> = vec![Arc::new(LogDispatcher)];
        if let Some(path) = &config.summary_out {
            dispatchers.push(Arc::new(JsonFileDispatcher::new(path)));
        }

        let scheduler = match config.effective_workers() {
            1 => ChunkScheduler::sequential(),
            workers => ChunkScheduler::parallel(workers),
        };
        let uploader = TransactionalUploader::new(config.chunk_size);

        Self {
            config,
            store,
            dispatchers,
            cancel: CancellationToken::new(),
            scheduler,
            deduplicator: Deduplicator::default(),
            uploader,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatchers.push(dispatcher);
        self
    }

    /// Cancelling stops new files from starting; files already in flight finish
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute one run
    ///
    /// Returns `Err` only for configuration problems found before any file is touched.
    /// Everything after that, including an aborted run, is reported in the outcome.
    pub async fn run(&self) -> IngestResult<RunOutcome> {
        self.config.validate()?;
        let run_id = Uuid::new_v4();
        self.execute(run_id)
            .instrument(tracing::info_span!("run", run_id = %run_id))
            .await
    }

    async fn execute(&self, run_id: Uuid) -> IngestResult<RunOutcome> {
        let paths = source::scan(&self.config)?;
        info!(
            directory = %self.config.directory.display(),
            files = paths.len(),
            dry_run = self.config.dry_run,
            workers = self.scheduler.workers(),
            "Starting ingestion run"
        );

        let mut builder = QcReportBuilder::new(run_id, self.config.dry_run);
        let tables = TableManager::new(
            Arc::clone(&self.store),
            self.config
                .backups_active()
                .then(|| self.config.backup_dir.clone()),
        );

        let mut unavailable = BTreeMap::new();
        let mut abort_reason = None;
        if self.cancel.is_cancelled() {
            abort_reason = Some(CANCELLED.to_string());
        } else {
            let file_types = self.detect_all(&paths).await;
            match self.prepare(&tables, &file_types).await {
                Ok(failed) => unavailable = failed,
                Err(e) if e.is_run_fatal() => {
                    error!(error = %e, "Run aborted before any file was uploaded");
                    self.cancel.cancel();
                    abort_reason = Some(e.to_string());
                }
                Err(e) => {
                    error!(error = %e, "Destination tables unavailable");
                    unavailable = file_types.iter().map(|ft| (*ft, e.to_string())).collect();
                }
            }
        }

        let outcomes = match &abort_reason {
            Some(reason) => paths
                .iter()
                .map(|path| FileOutcome::skipped(path, reason))
                .collect(),
            None => self.process_all(&paths, &unavailable).await,
        };
        if abort_reason.is_none() && self.cancel.is_cancelled() {
            abort_reason = Some(CANCELLED.to_string());
        }

        let mut results = Vec::with_capacity(outcomes.len());
        let mut dropped = DroppedRecords::default();
        for outcome in outcomes {
            builder.push(outcome.report);
            results.push(outcome.result);
            if let Some(file) = outcome.dropped {
                dropped.add(file.file_type, &file.source_file, file.rows);
            }
        }

        let dropped_records = match dropped.write(&self.config.qc_dir, run_id, Utc::now()).await {
            Ok(exports) => exports,
            Err(e) => {
                error!(error = %e, rows = dropped.len(), "Failed to write dropped records");
                Vec::new()
            }
        };
        builder.record_dropped(dropped_records.clone());

        let backups = tables.backups().await;
        let report = builder.finish(backups.clone(), abort_reason.clone());
        let report_path = match QcReportBuilder::write(&report, &self.config.qc_dir).await {
            Ok(path) => Some(path),
            Err(e) => {
                error!(error = %e, "Failed to write QC report");
                None
            }
        };

        let aborted = abort_reason.is_some();
        let summary = RunSummary::from_results(
            run_id,
            self.config.dry_run,
            aborted,
            &results,
            report_path
                .iter()
                .cloned()
                .chain(dropped_records.iter().map(|d| d.path.clone()))
                .collect(),
        );
        for dispatcher in &self.dispatchers {
            if let Err(e) = dispatcher.dispatch(&summary).await {
                warn!(error = %e, "Notification dispatch failed");
            }
        }

        info!(
            files = results.len(),
            succeeded = summary.files_succeeded,
            inserted = summary.rows_inserted,
            duplicates = summary.rows_skipped_as_duplicate,
            aborted,
            "Ingestion run finished"
        );

        Ok(RunOutcome {
            run_id,
            results,
            report,
            report_path,
            backups,
            dropped_records,
            aborted,
            abort_reason,
        })
    }

    /// Types of all readable, classifiable files; the rest fail later on their own
    async fn detect_all(&self, paths: &[PathBuf]) -> Vec<FileType> {
        let paths = paths.to_vec();
        let detected = tokio::task::spawn_blocking(move || {
            paths
                .iter()
                .filter_map(|path| {
                    let header = source::peek_header(path).ok()?;
                    classify(path, &header).ok().map(|(file_type, _)| file_type)
                })
                .collect::<BTreeSet<_>>()
        })
        .await;

        match detected {
            Ok(types) => types.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "Pre-scan of file types failed");
                Vec::new()
            }
        }
    }

    /// Back up, then create, every destination table the run may write to
    ///
    /// A backup failure is an error; tables that could not be created are returned by
    /// type so only their files fail.
    async fn prepare(
        &self,
        tables: &TableManager,
        file_types: &[FileType],
    ) -> IngestResult<BTreeMap<FileType, String>> {
        if self.config.dry_run {
            return Ok(BTreeMap::new());
        }
        tables.backup_before_mutation(file_types).await?;
        Ok(tables.ensure_tables(file_types).await)
    }

    async fn process_all(
        &self,
        paths: &[PathBuf],
        unavailable: &BTreeMap<FileType, String>,
    ) -> Vec<FileOutcome> {
        let mut indexed: Vec<(usize, FileOutcome)> = stream::iter(paths.iter().enumerate())
            .map(|(i, path)| async move { (i, self.process_file(path, unavailable).await) })
            .buffer_unordered(self.config.file_concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, outcome)| outcome).collect()
    }

    #[tracing::instrument(skip(self, unavailable), fields(file = %path.display()))]
    async fn process_file(
        &self,
        path: &Path,
        unavailable: &BTreeMap<FileType, String>,
    ) -> FileOutcome {
        if self.cancel.is_cancelled() {
            return FileOutcome::skipped(path, "run cancelled before this file started");
        }

        let owned = path.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || load_file(&owned))
            .await
            .map_err(IngestError::from)
            .and_then(|r| r);
        let (source, table) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "File rejected");
                return FileOutcome::stopped(path, None, FileStatus::Rejected, e);
            }
        };

        if let Some(reason) = unavailable.get(&source.file_type) {
            let err = IngestError::TableUnavailable {
                table: qualified_table(self.store.schema_name(), source.file_type),
                reason: reason.clone(),
            };
            warn!(error = %err, "File rejected");
            return FileOutcome::stopped(path, Some(&source), FileStatus::Rejected, err);
        }

        let columns = match validate_header(path, source.file_type, &table.header) {
            Ok(columns) => columns,
            Err(e) => {
                warn!(error = %e, "File rejected");
                return FileOutcome::stopped(path, Some(&source), FileStatus::Rejected, e);
            }
        };

        let ctx = Arc::new(FileContext {
            file_type: source.file_type,
            columns,
            file_stem: file_stem(path),
        });
        let chunks = partition(table.rows, self.config.chunk_size);
        let mut processed = match self.scheduler.run(ctx, chunks).await {
            Ok(processed) => processed,
            Err(e) => {
                error!(error = %e, "Chunk processing failed");
                return FileOutcome::stopped(path, Some(&source), FileStatus::Rejected, e);
            }
        };

        if !processed.errors.is_empty() {
            warn!(
                errors = processed.errors.len(),
                valid = processed.valid_row_count(),
                "Rows failed validation"
            );
            if self.config.policy == ValidationPolicy::Strict {
                let err = IngestError::StrictValidation {
                    path: path.to_path_buf(),
                    error_count: processed.errors.len(),
                };
                return Self::rejected_after_processing(&source, &processed, err);
            }
        }

        let records = std::mem::take(&mut processed.records);
        let deduped = match self
            .deduplicator
            .partition(self.store.as_ref(), source.file_type, records)
            .await
        {
            Ok(deduped) => deduped,
            Err(e) => {
                error!(error = %e, "Duplicate lookup failed");
                return Self::rejected_after_processing(&source, &processed, e);
            }
        };

        let result = if self.config.dry_run {
            info!(
                would_insert = deduped.fresh.len(),
                duplicates = deduped.duplicate_count(),
                "Dry run, nothing persisted"
            );
            UploadResult {
                path: source.path.clone(),
                file_type: Some(source.file_type),
                status: FileStatus::DryRun,
                succeeded: true,
                rows_inserted: 0,
                rows_skipped_as_duplicate: deduped.duplicate_count() as u64,
                error: None,
                verified: None,
            }
        } else {
            self.uploader
                .upload(self.store.as_ref(), &source, &deduped)
                .await
        };

        let report = QcReportBuilder::file_report(&source, &processed, Some(&deduped), &result);
        let dropped = FileDropped::new(&source, &processed, Some(&deduped));
        FileOutcome {
            result,
            report,
            dropped: Some(dropped),
        }
    }

    fn rejected_after_processing(
        source: &SourceFile,
        processed: &ProcessedFile,
        err: IngestError,
    ) -> FileOutcome {
        let result = UploadResult::failed(
            source.path.clone(),
            Some(source.file_type),
            FileStatus::Rejected,
            err,
        );
        let report = QcReportBuilder::file_report(source, processed, None, &result);
        FileOutcome {
            result,
            report,
            dropped: Some(FileDropped::new(source, processed, None)),
        }
    }
}
