//! Content digests of logical records
//!
//! A record hash covers the file type tag followed by the type's identifying fields,
//! each in canonical form, joined with the ASCII unit separator and digested with
//! SHA-256. Equal logical records hash equally no matter how their source text was
//! cased, spaced or formatted.

use crate::types::{FileType, Record, RecordHash, Value};
use sha2::{Digest, Sha256};

const SEPARATOR: u8 = 0x1f;

/// Canonical text of one value as it enters the digest
pub fn canonical(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => {
            // Fold -0.0 into 0.0 so both print the same.
            let v = if *v == 0.0 { 0.0 } else { *v };
            v.to_string()
        }
        Value::Text(s) => s
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase(),
    }
}

/// Digest of a record's identifying fields
pub fn record_hash(file_type: FileType, record: &Record) -> RecordHash {
    let schema = file_type.schema();
    let mut hasher = Sha256::new();
    hasher.update(file_type.as_str().as_bytes());

    for name in schema.identity {
        hasher.update([SEPARATOR]);
        if let Some(value) = record.get(schema, name) {
            hasher.update(canonical(value).as_bytes());
        }
    }

    RecordHash::from_hex(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmb(sample: &str, value: Value, low: Value) -> Record {
        Record {
            row: 1,
            values: vec![Value::Text(sample.into()), value, low, Value::Null],
        }
    }

    #[test]
    fn test_hash_shape() {
        let hash = record_hash(FileType::Tmb, &tmb("S1", Value::Float(4.2), Value::Null));
        assert_eq!(hash.as_str().len(), RecordHash::HEX_LEN);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_ignores_non_identifying_fields_and_row() {
        let a = record_hash(FileType::Tmb, &tmb("S1", Value::Float(4.2), Value::Null));
        let mut other = tmb("S1", Value::Float(4.2), Value::Float(0.3));
        other.row = 99;
        assert_eq!(a, record_hash(FileType::Tmb, &other));
    }

    #[test]
    fn test_hash_normalizes_case_and_whitespace() {
        let a = record_hash(FileType::Tmb, &tmb("sample  A", Value::Float(1.0), Value::Null));
        let b = record_hash(FileType::Tmb, &tmb(" Sample A", Value::Float(1.0), Value::Null));
        assert_eq!(a, b);
        assert_eq!(canonical(&Value::Float(-0.0)), canonical(&Value::Float(0.0)));
    }

    #[test]
    fn test_hash_separates_fields_and_types() {
        let a = record_hash(FileType::Tmb, &tmb("S1", Value::Float(12.0), Value::Null));
        let b = record_hash(FileType::Tmb, &tmb("S11", Value::Float(2.0), Value::Null));
        assert_ne!(a, b);

        // Same field values under a different type tag must not collide.
        let clinical = Record {
            row: 1,
            values: vec![Value::Text("S1".into()), Value::Text("12".into())],
        };
        let tmb_like = tmb("S1", Value::Int(12), Value::Null);
        assert_ne!(
            record_hash(FileType::Clinical, &clinical),
            record_hash(FileType::Tmb, &tmb_like)
        );
    }
}
