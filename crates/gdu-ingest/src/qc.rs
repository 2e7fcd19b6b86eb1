//! Quality-control aggregation
//!
//! Column statistics are collected per chunk and merged in chunk-offset order, so a
//! file's report is identical for sequential and parallel runs. File reports are
//! collected in file-processing order into one [`RunReport`] per run, written as JSON
//! to the QC directory.

use crate::chunk::ProcessedFile;
use crate::dedup::DedupedSet;
use crate::dropped::DroppedExport;
use crate::error::IngestResult;
use crate::schema::FileSchema;
use crate::table::TableBackup;
use crate::types::{FileStatus, FileType, Record, RowError, SourceFile, UploadResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ============================================================================
// Column statistics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct NumericStats {
    count: usize,
    min: f64,
    max: f64,
    sum: f64,
    sum_sq: f64,
}

impl NumericStats {
    fn single(v: f64) -> Self {
        Self {
            count: 1,
            min: v,
            max: v,
            sum: v,
            sum_sq: v * v,
        }
    }

    fn merge(&mut self, other: NumericStats) {
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
    }

    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    /// Sample standard deviation, undefined below two values
    fn std(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        let n = self.count as f64;
        let variance = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
        Some(variance.max(0.0).sqrt())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct FieldStats {
    missing: usize,
    present: usize,
    distinct: BTreeSet<String>,
    numeric: Option<NumericStats>,
}

/// Per-field counters for one chunk or one whole file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnStats {
    fields: BTreeMap<&'static str, FieldStats>,
}

impl ColumnStats {
    /// Count one raw cell as missing or present
    pub fn count_missing(&mut self, field: &'static str, missing: bool) {
        let stats = self.fields.entry(field).or_default();
        if missing {
            stats.missing += 1;
        } else {
            stats.present += 1;
        }
    }

    /// Fold the values of one accepted record
    pub fn observe(&mut self, schema: &FileSchema, record: &Record) {
        for (spec, value) in schema.fields.iter().zip(&record.values) {
            if value.is_null() {
                continue;
            }
            let stats = self.fields.entry(spec.name).or_default();
            stats.distinct.insert(value.render());
            if let Some(v) = value.as_f64().filter(|_| spec.kind.is_numeric()) {
                let single = NumericStats::single(v);
                stats.numeric = Some(match stats.numeric {
                    Some(mut numeric) => {
                        numeric.merge(single);
                        numeric
                    }
                    None => single,
                });
            }
        }
    }

    /// Append another chunk's counters; callers merge in offset order
    pub fn merge(&mut self, other: ColumnStats) {
        for (name, theirs) in other.fields {
            let ours = self.fields.entry(name).or_default();
            ours.missing += theirs.missing;
            ours.present += theirs.present;
            ours.distinct.extend(theirs.distinct);
            ours.numeric = match (ours.numeric, theirs.numeric) {
                (Some(mut a), Some(b)) => {
                    a.merge(b);
                    Some(a)
                }
                (a, b) => a.or(b),
            };
        }
    }

    /// Missing cell count per field that has any
    pub fn missing_counts(&self) -> BTreeMap<String, usize> {
        self.fields
            .iter()
            .filter(|(_, s)| s.missing > 0)
            .map(|(name, s)| (name.to_string(), s.missing))
            .collect()
    }

    /// One summary per schema field, in schema order
    pub fn summaries(&self, schema: &FileSchema) -> Vec<ColumnSummary> {
        schema
            .fields
            .iter()
            .filter_map(|spec| {
                let stats = self.fields.get(spec.name)?;
                let numeric = stats.numeric;
                Some(ColumnSummary {
                    field: spec.name.to_string(),
                    missing: stats.missing,
                    present: stats.present,
                    distinct: stats.distinct.len(),
                    count: numeric.map(|n| n.count),
                    min: numeric.map(|n| n.min),
                    max: numeric.map(|n| n.max),
                    mean: numeric.map(|n| n.mean()),
                    std: numeric.and_then(|n| n.std()),
                })
            })
            .collect()
    }
}

/// Reported statistics for one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub field: String,
    pub missing: usize,
    pub present: usize,
    pub distinct: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
}

// ============================================================================
// Reports
// ============================================================================

/// QC outcome of one file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub file_type: Option<FileType>,
    pub checksum: Option<String>,
    pub status: FileStatus,
    pub raw_row_count: usize,
    pub valid_row_count: usize,
    pub missing_values: BTreeMap<String, usize>,
    /// Persisted plus in-file duplicates
    pub duplicate_count: usize,
    pub persisted_duplicates: usize,
    pub in_file_duplicates: usize,
    pub validation_errors: Vec<RowError>,
    pub coercion_warnings: Vec<RowError>,
    pub inserted_count: u64,
    /// Rows a dry run found new
    #[serde(skip_serializing_if = "Option::is_none")]
    pub would_insert: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub column_stats: Vec<ColumnSummary>,
}

impl FileReport {
    /// Report for a file that stopped before its rows were processed
    pub fn without_rows(result: &UploadResult, source: Option<&SourceFile>) -> Self {
        Self {
            path: result.path.clone(),
            file_type: result.file_type,
            checksum: source.map(|s| s.checksum.clone()),
            status: result.status,
            raw_row_count: source.map_or(0, |s| s.raw_row_count),
            valid_row_count: 0,
            missing_values: BTreeMap::new(),
            duplicate_count: 0,
            persisted_duplicates: 0,
            in_file_duplicates: 0,
            validation_errors: Vec::new(),
            coercion_warnings: Vec::new(),
            inserted_count: 0,
            would_insert: None,
            verified: None,
            error: result.error.clone(),
            column_stats: Vec::new(),
        }
    }
}

/// Run-wide totals
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunTotals {
    pub files: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub raw_rows: usize,
    pub valid_rows: usize,
    pub inserted: u64,
    pub duplicates: usize,
    pub validation_errors: usize,
}

/// QC report of one run, files in processing order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub totals: RunTotals,
    pub backups: Vec<TableBackup>,
    /// Exported rows that were not uploaded
    pub dropped_records: Vec<DroppedExport>,
    pub files: Vec<FileReport>,
}

/// Collects file reports for one run
#[derive(Debug)]
pub struct QcReportBuilder {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    dry_run: bool,
    files: Vec<FileReport>,
    dropped_records: Vec<DroppedExport>,
}

impl QcReportBuilder {
    pub fn new(run_id: Uuid, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            dry_run,
            files: Vec::new(),
            dropped_records: Vec::new(),
        }
    }

    /// Report for a file whose rows went through chunk processing
    ///
    /// `deduped` is absent when the file was rejected before deduplication.
    pub fn file_report(
        source: &SourceFile,
        processed: &ProcessedFile,
        deduped: Option<&DedupedSet>,
        result: &UploadResult,
    ) -> FileReport {
        let schema = source.file_type.schema();
        let dry_run = result.status == FileStatus::DryRun;

        FileReport {
            path: source.path.clone(),
            file_type: Some(source.file_type),
            checksum: Some(source.checksum.clone()),
            status: result.status,
            raw_row_count: source.raw_row_count,
            valid_row_count: processed.valid_row_count(),
            missing_values: processed.stats.missing_counts(),
            duplicate_count: deduped.map_or(0, DedupedSet::duplicate_count),
            persisted_duplicates: deduped.map_or(0, |d| d.persisted_duplicates),
            in_file_duplicates: deduped.map_or(0, DedupedSet::in_file_duplicates),
            validation_errors: processed.errors.clone(),
            coercion_warnings: processed.warnings.clone(),
            inserted_count: result.rows_inserted,
            would_insert: deduped.filter(|_| dry_run).map(|d| d.fresh.len()),
            verified: result.verified,
            error: result.error.clone(),
            column_stats: processed.stats.summaries(schema),
        }
    }

    /// Append a file report; call in file-processing order
    pub fn push(&mut self, report: FileReport) {
        self.files.push(report);
    }

    pub fn record_dropped(&mut self, exports: Vec<DroppedExport>) {
        self.dropped_records.extend(exports);
    }

    pub fn finish(self, backups: Vec<TableBackup>, abort_reason: Option<String>) -> RunReport {
        let totals = self.files.iter().fold(RunTotals::default(), |mut t, f| {
            t.files += 1;
            if f.status.is_success() {
                t.files_succeeded += 1;
            } else {
                t.files_failed += 1;
            }
            t.raw_rows += f.raw_row_count;
            t.valid_rows += f.valid_row_count;
            t.inserted += f.inserted_count;
            t.duplicates += f.duplicate_count;
            t.validation_errors += f.validation_errors.len();
            t
        });

        RunReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            dry_run: self.dry_run,
            aborted: abort_reason.is_some(),
            abort_reason,
            totals,
            backups,
            dropped_records: self.dropped_records,
            files: self.files,
        }
    }

    /// Write the report as `qc_report_<YYYYmmdd_HHMMSS>_<run>.json` under `dir`
    pub async fn write(report: &RunReport, dir: &Path) -> IngestResult<PathBuf> {
        let run = report.run_id.simple().to_string();
        let name = format!(
            "qc_report_{}_{}.json",
            report.started_at.format("%Y%m%d_%H%M%S"),
            &run[..8]
        );
        let path = dir.join(name);

        let json = serde_json::to_vec_pretty(report)?;
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, json).await?;

        tracing::info!(path = %path.display(), files = report.files.len(), "QC report written");
        Ok(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Value;
    use tempfile::TempDir;

    fn tmb_record(row: usize, sample: &str, tmb: f64) -> Record {
        Record {
            row,
            values: vec![
                Value::Text(sample.into()),
                Value::Float(tmb),
                Value::Null,
                Value::Null,
            ],
        }
    }

    #[test]
    fn test_stats_merge_matches_single_pass() {
        let schema = FileType::Tmb.schema();
        let records = [
            tmb_record(1, "S1", 2.0),
            tmb_record(2, "S2", 4.0),
            tmb_record(3, "S1", 9.0),
        ];

        let mut whole = ColumnStats::default();
        for r in &records {
            whole.count_missing("sample", false);
            whole.count_missing("binomial_low", true);
            whole.observe(schema, r);
        }

        let mut first = ColumnStats::default();
        let mut second = ColumnStats::default();
        for (i, r) in records.iter().enumerate() {
            let part = if i < 2 { &mut first } else { &mut second };
            part.count_missing("sample", false);
            part.count_missing("binomial_low", true);
            part.observe(schema, r);
        }
        first.merge(second);

        assert_eq!(first, whole);
        assert_eq!(whole.missing_counts().get("binomial_low"), Some(&3));
        assert!(!whole.missing_counts().contains_key("sample"));

        let summaries = whole.summaries(schema);
        let sample = summaries.iter().find(|s| s.field == "sample").unwrap();
        assert_eq!(sample.distinct, 2);
        assert_eq!(sample.mean, None);
        let tmb = summaries.iter().find(|s| s.field == "tmb").unwrap();
        assert_eq!(tmb.count, Some(3));
        assert_eq!(tmb.min, Some(2.0));
        assert_eq!(tmb.max, Some(9.0));
        assert_eq!(tmb.mean, Some(5.0));
        assert_eq!(tmb.std, Some(13f64.sqrt()));
    }

    #[test]
    fn test_std_needs_two_values() {
        let schema = FileType::Tmb.schema();
        let mut stats = ColumnStats::default();
        stats.observe(schema, &tmb_record(1, "S1", 4.0));
        let tmb = stats.summaries(schema).into_iter().find(|s| s.field == "tmb").unwrap();
        assert_eq!(tmb.mean, Some(4.0));
        assert_eq!(tmb.std, None);

        stats.observe(schema, &tmb_record(2, "S2", 4.0));
        let tmb = stats.summaries(schema).into_iter().find(|s| s.field == "tmb").unwrap();
        assert_eq!(tmb.std, Some(0.0));
    }

    #[tokio::test]
    async fn test_finish_and_write() {
        let dir = TempDir::new().unwrap();
        let mut builder = QcReportBuilder::new(Uuid::new_v4(), false);

        let ok = UploadResult {
            path: PathBuf::from("a.tsv"),
            file_type: Some(FileType::Tmb),
            status: FileStatus::Uploaded,
            succeeded: true,
            rows_inserted: 2,
            rows_skipped_as_duplicate: 1,
            error: None,
            verified: Some(true),
        };
        let mut report = FileReport::without_rows(&ok, None);
        report.inserted_count = 2;
        report.duplicate_count = 1;
        builder.push(report);
        builder.push(FileReport::without_rows(
            &UploadResult::failed(PathBuf::from("b.txt"), None, FileStatus::Rejected, "bad"),
            None,
        ));

        let run = builder.finish(Vec::new(), None);
        assert!(!run.aborted);
        assert_eq!(run.totals.files, 2);
        assert_eq!(run.totals.files_failed, 1);
        assert_eq!(run.totals.inserted, 2);

        let path = QcReportBuilder::write(&run, dir.path()).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("qc_report_") && name.ends_with(".json"));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["files"][0]["path"], "a.tsv");
        assert_eq!(json["files"][1]["status"], "rejected");
        assert_eq!(json["files"][1]["error"], "bad");
    }
}
