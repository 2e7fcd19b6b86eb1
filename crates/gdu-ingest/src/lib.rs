//! GDU Ingest Library
//!
//! Ingests tab-delimited genomic record files into per-type PostgreSQL tables.
//!
//! # Pipeline
//!
//! - **Detection**: classify each file by its header ([`schema::detect`])
//! - **Validation**: required columns and per-row value rules ([`schema::validate`])
//! - **Coercion**: raw text to typed values ([`coerce`])
//! - **Hashing**: content digest of each record's identifying fields ([`hash`])
//! - **Chunking**: bounded parallel per-chunk work merged by offset ([`chunk`])
//! - **Deduplication**: batched lookup against persisted hashes ([`dedup`])
//! - **Backup and upload**: table snapshots, then one transaction per file
//!   ([`table`], [`upload`])
//! - **Reporting**: QC report per run, dropped rows per table and a summary for
//!   notification ([`qc`], [`dropped`], [`notify`])
//!
//! # Example
//!
//! ```no_run
//! use gdu_ingest::{config::RunConfig, storage::MemoryStore, Pipeline};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = RunConfig::new("./incoming");
//!     config.dry_run = true;
//!     let outcome = Pipeline::new(config, Arc::new(MemoryStore::default())).run().await?;
//!     println!("{} files", outcome.results.len());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod chunk;
pub mod coerce;
pub mod config;
pub mod db;
pub mod dedup;
pub mod dropped;
pub mod error;
pub mod hash;
pub mod notify;
pub mod pipeline;
pub mod qc;
pub mod schema;
pub mod source;
pub mod storage;
pub mod table;
pub mod types;
pub mod upload;

// Re-export commonly used types
pub use error::{IngestError, IngestResult};
pub use pipeline::{Pipeline, RunOutcome};
pub use types::{FileStatus, FileType, UploadResult};
