//! GDU Common Library
//!
//! Shared utilities and error handling for the genomic data upload workspace.
//!
//! # Overview
//!
//! - **Error Handling**: `GduError` and the `Result` alias
//! - **Checksums**: file and stream digests used for provenance and backups
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use gdu_common::checksum::{compute_file_checksum, ChecksumAlgorithm};
//! use gdu_common::Result;
//!
//! fn fingerprint(path: &str) -> Result<()> {
//!     let checksum = compute_file_checksum(path, ChecksumAlgorithm::Sha256)?;
//!     tracing::info!(%checksum, "source file fingerprint");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{GduError, Result};
