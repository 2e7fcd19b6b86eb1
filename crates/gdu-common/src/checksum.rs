//! Checksum utilities for source files and table backups

use crate::error::{GduError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;
use std::path::Path;

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Compute checksum for a file
pub fn compute_file_checksum(
    path: impl AsRef<Path>,
    algorithm: ChecksumAlgorithm,
) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file, algorithm)
}

/// Compute checksum for any readable source
pub fn compute_checksum<R: Read>(reader: &mut R, algorithm: ChecksumAlgorithm) -> Result<String> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => digest_reader::<Sha256, _>(reader),
        ChecksumAlgorithm::Sha512 => digest_reader::<Sha512, _>(reader),
    }
}

/// Compute checksum of an in-memory buffer
pub fn compute_bytes_checksum(data: &[u8], algorithm: ChecksumAlgorithm) -> String {
    match algorithm {
        ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
    }
}

fn digest_reader<D: Digest, R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = D::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify checksum for a file
///
/// Returns `ChecksumMismatch` when the file on disk does not hash to `expected`.
pub fn verify_file_checksum(
    path: impl AsRef<Path>,
    expected: &str,
    algorithm: ChecksumAlgorithm,
) -> Result<()> {
    let actual = compute_file_checksum(path, algorithm)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(GduError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_compute_checksum_sha256() {
        let mut cursor = Cursor::new(b"hello world");
        let checksum = compute_checksum(&mut cursor, ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(checksum, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
    }

    #[test]
    fn test_bytes_and_reader_agree() {
        let data = b"sample\ttmb\nS1\t4.2\n";
        let mut cursor = Cursor::new(data);
        let streamed = compute_checksum(&mut cursor, ChecksumAlgorithm::Sha512).unwrap();
        assert_eq!(streamed, compute_bytes_checksum(data, ChecksumAlgorithm::Sha512));
    }

    #[test]
    fn test_verify_file_checksum() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        let expected = compute_bytes_checksum(b"hello world", ChecksumAlgorithm::Sha256);
        assert!(verify_file_checksum(file.path(), &expected, ChecksumAlgorithm::Sha256).is_ok());

        let err = verify_file_checksum(file.path(), "deadbeef", ChecksumAlgorithm::Sha256)
            .unwrap_err();
        assert!(matches!(err, GduError::ChecksumMismatch { .. }));
    }
}
