//! Conversion of raw text fields into typed values

use crate::schema::{ColumnMap, FieldKind, FileSchema};
use crate::types::{RawRow, Record, RowError, Value};

/// Tokens read as "no value" (compared case-insensitively after trimming)
pub const MISSING_TOKENS: &[&str] = &["", "na", "n/a", "nan", "null", ".", "-"];

/// Whether raw text counts as an unset value for a field of this kind
pub fn is_missing_token(kind: FieldKind, raw: &str) -> bool {
    let token = raw.trim();
    // A lone dash is a deletion allele, not a missing value.
    if kind == FieldKind::Allele && token == "-" {
        return false;
    }
    MISSING_TOKENS.iter().any(|m| token.eq_ignore_ascii_case(m))
}

/// Normalize a chromosome token: `chr` prefix dropped, uppercased, X/Y/M mapped
pub fn normalize_chromosome(raw: &str) -> Option<String> {
    let token = raw.trim();
    let stripped = match token.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("chr") => &token[3..],
        _ => token,
    };
    let upper = stripped.to_ascii_uppercase();
    let mapped = match upper.as_str() {
        "X" => "23".to_string(),
        "Y" => "24".to_string(),
        "M" | "MT" => "MT".to_string(),
        other => other.to_string(),
    };

    let numeric = !mapped.is_empty() && mapped.bytes().all(|b| b.is_ascii_digit());
    (numeric || mapped == "MT").then_some(mapped)
}

fn parse_integer(token: &str) -> Option<i64> {
    if let Ok(v) = token.parse::<i64>() {
        return Some(v);
    }
    let v = token.parse::<f64>().ok()?;
    let in_range = v >= i64::MIN as f64 && v <= i64::MAX as f64;
    (v.is_finite() && v.fract() == 0.0 && in_range).then_some(v as i64)
}

/// Convert one raw field; `Err` carries the reason
pub fn coerce_value(kind: FieldKind, raw: &str) -> Result<Value, String> {
    if is_missing_token(kind, raw) {
        return Ok(Value::Null);
    }
    let token = raw.trim();

    match kind {
        FieldKind::Text => Ok(Value::Text(token.to_string())),
        FieldKind::Allele => Ok(Value::Text(token.to_ascii_uppercase())),
        FieldKind::Integer => parse_integer(token)
            .map(Value::Int)
            .ok_or_else(|| format!("'{token}' is not an integer")),
        FieldKind::Float => token
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Value::Float)
            .ok_or_else(|| format!("'{token}' is not a finite number")),
        FieldKind::Chromosome => normalize_chromosome(token)
            .map(Value::Text)
            .ok_or_else(|| format!("'{token}' is not a recognized chromosome")),
    }
}

/// Result of coercing one raw row
#[derive(Debug, Clone, PartialEq)]
pub struct CoercedRow {
    /// `None` when a required field failed to coerce
    pub record: Option<Record>,
    /// Required-field coercion failures
    pub errors: Vec<RowError>,
    /// Optional fields degraded to unset
    pub warnings: Vec<RowError>,
}

/// Coerce every schema field of a raw row
///
/// `file_stem` fills fields that may be taken from the file name when the column is
/// absent.
pub fn coerce_row(
    schema: &FileSchema,
    columns: &ColumnMap,
    raw: &RawRow,
    file_stem: &str,
) -> CoercedRow {
    let mut values = Vec::with_capacity(schema.fields.len());
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for (i, field) in schema.fields.iter().enumerate() {
        let text = match columns.column(i) {
            Some(col) => raw.fields.get(col).map(String::as_str),
            None if field.stem_fallback => Some(file_stem),
            None => None,
        };
        let Some(text) = text else {
            values.push(Value::Null);
            continue;
        };

        match coerce_value(field.kind, text) {
            Ok(value) => values.push(value),
            Err(reason) if field.required => {
                errors.push(RowError::coercion(raw.row, field.name, reason));
                values.push(Value::Null);
            }
            Err(reason) => {
                tracing::warn!(
                    row = raw.row,
                    field = field.name,
                    %reason,
                    "Optional value could not be coerced, leaving it unset"
                );
                warnings.push(RowError::coercion(raw.row, field.name, reason));
                values.push(Value::Null);
            }
        }
    }

    let record = errors.is_empty().then(|| Record {
        row: raw.row,
        values,
    });

    CoercedRow {
        record,
        errors,
        warnings,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::validate_header;
    use crate::types::FileType;
    use std::path::Path;

    #[test]
    fn test_chromosome_normalization() {
        assert_eq!(normalize_chromosome("chr1").as_deref(), Some("1"));
        assert_eq!(normalize_chromosome("CHRX").as_deref(), Some("23"));
        assert_eq!(normalize_chromosome("y").as_deref(), Some("24"));
        assert_eq!(normalize_chromosome("chrM").as_deref(), Some("MT"));
        assert_eq!(normalize_chromosome(" 17 ").as_deref(), Some("17"));
        assert_eq!(normalize_chromosome("chrUn_gl000220"), None);
        assert_eq!(normalize_chromosome("chr"), None);
    }

    #[test]
    fn test_integer_accepts_whole_floats() {
        assert_eq!(coerce_value(FieldKind::Integer, "12"), Ok(Value::Int(12)));
        assert_eq!(coerce_value(FieldKind::Integer, "12.0"), Ok(Value::Int(12)));
        assert!(coerce_value(FieldKind::Integer, "12.5").is_err());
        assert!(coerce_value(FieldKind::Integer, "twelve").is_err());
    }

    #[test]
    fn test_missing_tokens() {
        for token in ["", "NA", "n/a", "NaN", "null", ".", "-", "  "] {
            assert_eq!(coerce_value(FieldKind::Float, token), Ok(Value::Null), "{token:?}");
        }
        assert_eq!(
            coerce_value(FieldKind::Allele, "-"),
            Ok(Value::Text("-".into()))
        );
        assert!(coerce_value(FieldKind::Float, "inf").is_err());
    }

    fn cnv_row(fields: &[&str]) -> (ColumnMap, RawRow) {
        let header: Vec<String> = ["chromosome", "start", "end", "log2", "depth"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let map = validate_header(Path::new("S1.cns"), FileType::Cnv, &header).unwrap();
        let row = RawRow {
            row: 3,
            fields: fields.iter().map(|s| s.to_string()).collect(),
        };
        (map, row)
    }

    #[test]
    fn test_coerce_row_with_stem_fallback() {
        let (map, raw) = cnv_row(&["chr2", "100", "2000", "-0.25", "31.5"]);
        let out = coerce_row(FileType::Cnv.schema(), &map, &raw, "S1");
        assert!(out.errors.is_empty());
        let record = out.record.unwrap();
        assert_eq!(record.row, 3);
        assert_eq!(record.values[0], Value::Text("S1".into()));
        assert_eq!(record.values[1], Value::Text("2".into()));
        assert_eq!(record.values[2], Value::Int(100));
        assert_eq!(record.values[5], Value::Float(-0.25));
        assert_eq!(record.values[7], Value::Float(31.5));
    }

    #[test]
    fn test_required_failure_drops_row_optional_failure_degrades() {
        let (map, raw) = cnv_row(&["chr2", "abc", "2000", "-0.25", "deep"]);
        let out = coerce_row(FileType::Cnv.schema(), &map, &raw, "S1");
        assert!(out.record.is_none());
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].field, "start");
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].field, "depth");

        let (map, raw) = cnv_row(&["chr2", "1", "2000", "-0.25", "deep"]);
        let out = coerce_row(FileType::Cnv.schema(), &map, &raw, "S1");
        let record = out.record.unwrap();
        assert_eq!(record.values[7], Value::Null);
    }
}
