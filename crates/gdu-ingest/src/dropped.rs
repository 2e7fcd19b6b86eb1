//! Rows left out of an upload
//!
//! Rows that failed coercion or validation keep their raw text; rows collapsed as
//! in-file duplicates keep their typed values. Both are exported per destination
//! table as `<type>_data_dropped_records` CSV files next to the QC report, one row
//! per dropped record with its source file and reason.

use crate::dedup::InFileRepeat;
use crate::error::IngestResult;
use crate::schema::{ColumnMap, FileSchema};
use crate::types::{FileType, RawRow, RowError, Value};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A source row that was not uploaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedRow {
    pub row: usize,
    pub reason: String,
    /// One value per schema field, in schema order
    pub values: Vec<String>,
}

impl DroppedRow {
    /// A row rejected by coercion or validation, with its raw cells
    pub fn rejected(
        schema: &FileSchema,
        columns: &ColumnMap,
        raw: &RawRow,
        errors: &[RowError],
    ) -> Self {
        let values = (0..schema.fields.len())
            .map(|field| {
                columns
                    .column(field)
                    .and_then(|col| raw.fields.get(col))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect();
        let reason = errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.reason))
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            row: raw.row,
            reason,
            values,
        }
    }

    /// A row collapsed into an earlier identical row
    pub fn repeated(repeat: &InFileRepeat) -> Self {
        Self {
            row: repeat.record.record.row,
            reason: format!("duplicate of row {}", repeat.first_row),
            values: repeat.record.record.values.iter().map(Value::render).collect(),
        }
    }
}

/// `<type>_data_dropped_records`
pub fn dropped_table_name(file_type: FileType) -> String {
    format!("{}_dropped_records", file_type.table_name())
}

/// One written dropped-records file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedExport {
    pub table: String,
    pub path: PathBuf,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SourcedRow {
    source_file: String,
    row: DroppedRow,
}

/// Dropped rows of a whole run, grouped by file type
#[derive(Debug, Clone, Default)]
pub struct DroppedRecords {
    by_type: BTreeMap<FileType, Vec<SourcedRow>>,
}

impl DroppedRecords {
    /// Add one file's dropped rows; call in file-processing order
    pub fn add(&mut self, file_type: FileType, source_file: &str, rows: Vec<DroppedRow>) {
        if rows.is_empty() {
            return;
        }
        self.by_type
            .entry(file_type)
            .or_default()
            .extend(rows.into_iter().map(|row| SourcedRow {
                source_file: source_file.to_string(),
                row,
            }));
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    /// Write one CSV per file type under `dir`
    ///
    /// Files are named `<type>_data_dropped_records_<YYYYmmdd_HHMMSS>_<run>.csv`.
    pub async fn write(
        &self,
        dir: &Path,
        run_id: Uuid,
        at: DateTime<Utc>,
    ) -> IngestResult<Vec<DroppedExport>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let run = run_id.simple().to_string();
        tokio::fs::create_dir_all(dir).await?;

        let mut exports = Vec::with_capacity(self.by_type.len());
        for (file_type, rows) in &self.by_type {
            let table = dropped_table_name(*file_type);
            let path = dir.join(format!(
                "{table}_{}_{}.csv",
                at.format("%Y%m%d_%H%M%S"),
                &run[..8]
            ));
            tokio::fs::write(&path, render_csv(*file_type, rows)?).await?;

            tracing::info!(
                table = %table,
                rows = rows.len(),
                path = %path.display(),
                "Dropped records written"
            );
            exports.push(DroppedExport {
                table,
                path,
                rows: rows.len(),
            });
        }
        Ok(exports)
    }
}

fn render_csv(file_type: FileType, rows: &[SourcedRow]) -> IngestResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let header = ["source_file", "row", "reason"]
        .into_iter()
        .chain(file_type.schema().fields.iter().map(|f| f.name));
    writer.write_record(header)?;

    for sourced in rows {
        let row = sourced.row.row.to_string();
        let record = [
            sourced.source_file.as_str(),
            row.as_str(),
            sourced.row.reason.as_str(),
        ]
        .into_iter()
        .chain(sourced.row.values.iter().map(String::as_str));
        writer.write_record(record)?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()).into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hash::record_hash;
    use crate::schema::validate_header;
    use crate::types::{HashedRecord, Record};
    use tempfile::TempDir;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rejected_row_keeps_raw_cells_in_schema_order() {
        let columns = validate_header(
            Path::new("t.tsv"),
            FileType::Tmb,
            &header(&["tmb", "sample"]),
        )
        .unwrap();
        let raw = RawRow {
            row: 4,
            fields: vec!["-2".into(), "S1".into()],
        };
        let errors = [RowError::validation(4, "tmb", "must be >= 0")];

        let dropped = DroppedRow::rejected(FileType::Tmb.schema(), &columns, &raw, &errors);
        assert_eq!(dropped.row, 4);
        assert_eq!(dropped.reason, "tmb: must be >= 0");
        assert_eq!(dropped.values, vec!["S1", "-2", "", ""]);
    }

    #[tokio::test]
    async fn test_write_groups_by_type() {
        let dir = TempDir::new().unwrap();
        let record = Record {
            row: 3,
            values: vec![
                Value::Text("S1".into()),
                Value::Float(1.5),
                Value::Null,
                Value::Null,
            ],
        };
        let hash = record_hash(FileType::Tmb, &record);
        let repeat = InFileRepeat {
            record: HashedRecord { record, hash },
            first_row: 1,
        };

        let mut dropped = DroppedRecords::default();
        dropped.add(FileType::Tmb, "a.tsv", vec![DroppedRow::repeated(&repeat)]);
        dropped.add(FileType::Cnv, "b.cns", Vec::new());
        assert_eq!(dropped.len(), 1);

        let exports = dropped
            .write(dir.path(), Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].table, "tmb_data_dropped_records");
        assert_eq!(exports[0].rows, 1);

        let content = std::fs::read_to_string(&exports[0].path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "source_file,row,reason,sample,tmb,binomial_low,binomial_high",
                "a.tsv,3,duplicate of row 1,S1,1.5,,",
            ]
        );
    }

    #[tokio::test]
    async fn test_nothing_dropped_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let exports = DroppedRecords::default()
            .write(&dir.path().join("qc"), Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        assert!(exports.is_empty());
        assert!(!dir.path().join("qc").exists());
    }
}
