//! Run summary hand-off
//!
//! Rendering and delivery of summaries (mail, chat) live outside this crate. A
//! [`NotificationDispatcher`] receives the [`RunSummary`]; the built-in dispatchers log
//! it or write it as JSON for an external sender to pick up.

use crate::error::IngestResult;
use crate::types::UploadResult;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// A file that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// What a run did, for external notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub aborted: bool,
    pub total_files: usize,
    pub files_succeeded: usize,
    pub rows_inserted: u64,
    pub rows_skipped_as_duplicate: u64,
    pub failures: Vec<FileFailure>,
    /// QC report files
    pub attachments: Vec<PathBuf>,
}

impl RunSummary {
    pub fn from_results(
        run_id: Uuid,
        dry_run: bool,
        aborted: bool,
        results: &[UploadResult],
        attachments: Vec<PathBuf>,
    ) -> Self {
        let failures = results
            .iter()
            .filter(|r| !r.succeeded)
            .map(|r| FileFailure {
                path: r.path.clone(),
                reason: r.error.clone().unwrap_or_else(|| r.status.as_str().to_string()),
            })
            .collect();

        Self {
            run_id,
            dry_run,
            aborted,
            total_files: results.len(),
            files_succeeded: results.iter().filter(|r| r.succeeded).count(),
            rows_inserted: results.iter().map(|r| r.rows_inserted).sum(),
            rows_skipped_as_duplicate: results.iter().map(|r| r.rows_skipped_as_duplicate).sum(),
            failures,
            attachments,
        }
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, summary: &RunSummary) -> IngestResult<()>;
}

/// Emits the summary as structured log events
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, summary: &RunSummary) -> IngestResult<()> {
        tracing::info!(
            run_id = %summary.run_id,
            dry_run = summary.dry_run,
            aborted = summary.aborted,
            files = summary.total_files,
            succeeded = summary.files_succeeded,
            inserted = summary.rows_inserted,
            duplicates = summary.rows_skipped_as_duplicate,
            "Run summary"
        );
        for failure in &summary.failures {
            tracing::warn!(path = %failure.path.display(), reason = %failure.reason, "File failed");
        }
        Ok(())
    }
}

/// Writes the summary to a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileDispatcher {
    path: PathBuf,
}

impl JsonFileDispatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl NotificationDispatcher for JsonFileDispatcher {
    async fn dispatch(&self, summary: &RunSummary) -> IngestResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(summary)?).await?;
        tracing::debug!(path = %self.path.display(), "Run summary written");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{FileStatus, FileType};
    use tempfile::TempDir;

    fn results() -> Vec<UploadResult> {
        vec![
            UploadResult {
                path: PathBuf::from("a.tsv"),
                file_type: Some(FileType::Tmb),
                status: FileStatus::Uploaded,
                succeeded: true,
                rows_inserted: 2,
                rows_skipped_as_duplicate: 1,
                error: None,
                verified: Some(true),
            },
            UploadResult::failed(
                PathBuf::from("b.txt"),
                None,
                FileStatus::Rejected,
                "no schema",
            ),
        ]
    }

    #[test]
    fn test_summary_totals() {
        let summary = RunSummary::from_results(Uuid::nil(), false, false, &results(), vec![]);
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.files_succeeded, 1);
        assert_eq!(summary.rows_inserted, 2);
        assert_eq!(summary.rows_skipped_as_duplicate, 1);
        assert_eq!(
            summary.failures,
            vec![FileFailure {
                path: PathBuf::from("b.txt"),
                reason: "no schema".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_json_dispatcher_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/summary.json");
        let summary = RunSummary::from_results(
            Uuid::nil(),
            true,
            false,
            &results(),
            vec![PathBuf::from("qc.json")],
        );

        JsonFileDispatcher::new(&path).dispatch(&summary).await.unwrap();
        LogDispatcher.dispatch(&summary).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["total_files"], 2);
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["attachments"][0], "qc.json");
    }
}
