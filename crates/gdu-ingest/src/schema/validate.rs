//! Header and row validation

use super::{CrossRule, FileSchema, Rule};
use crate::error::{IngestError, IngestResult};
use crate::types::{FileType, Record, RowError, Value};
use std::path::Path;

/// Resolved header position for each schema field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub file_type: FileType,
    indices: Vec<Option<usize>>,
}

impl ColumnMap {
    /// Header position of the schema field at `field`, if the file carries it
    pub fn column(&self, field: usize) -> Option<usize> {
        self.indices.get(field).copied().flatten()
    }

    /// Positions of the schema fields present in the file
    pub fn mapped_fields(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices
            .iter()
            .enumerate()
            .filter_map(|(field, col)| col.map(|_| field))
    }
}

/// Check that all required columns are present and map fields to header positions
///
/// Aliases are tried in declaration order. A missing required column rejects the whole
/// file, unless the field can be filled from the file name.
pub fn validate_header(
    path: &Path,
    file_type: FileType,
    header: &[String],
) -> IngestResult<ColumnMap> {
    let schema = file_type.schema();
    let mut indices = Vec::with_capacity(schema.fields.len());
    let mut missing = Vec::new();

    for field in schema.fields {
        let position = field
            .aliases
            .iter()
            .find_map(|alias| header.iter().position(|h| h == alias));
        if position.is_none() && field.required && !field.stem_fallback {
            missing.push(field.name.to_string());
        }
        indices.push(position);
    }

    if !missing.is_empty() {
        return Err(IngestError::MissingRequiredColumns {
            path: path.to_path_buf(),
            file_type,
            missing,
        });
    }

    Ok(ColumnMap { file_type, indices })
}

/// Collect every value rule violation of a coerced record
pub fn check_row(schema: &FileSchema, record: &Record) -> Vec<RowError> {
    let mut errors = Vec::new();

    for (field, value) in schema.fields.iter().zip(&record.values) {
        if value.is_null() {
            if field.required {
                errors.push(RowError::validation(
                    record.row,
                    field.name,
                    "required value is missing",
                ));
            }
            continue;
        }

        for rule in field.rules {
            if let Some(reason) = violation(rule, value) {
                errors.push(RowError::validation(record.row, field.name, reason));
            }
        }
    }

    for rule in schema.cross_rules {
        match rule {
            CrossRule::Ordered { start, stop } => {
                let lower = record.get(schema, start).and_then(Value::as_f64);
                let upper = record.get(schema, stop).and_then(Value::as_f64);
                if let (Some(lower), Some(upper)) = (lower, upper) {
                    if lower > upper {
                        errors.push(RowError::validation(
                            record.row,
                            *start,
                            format!("{start} ({lower}) is greater than {stop} ({upper})"),
                        ));
                    }
                }
            }
        }
    }

    errors
}

fn violation(rule: &Rule, value: &Value) -> Option<String> {
    match rule {
        Rule::Min(min) => value
            .as_f64()
            .filter(|v| v < min)
            .map(|v| format!("value {v} is below minimum {min}")),
        Rule::Range(lo, hi) => value
            .as_f64()
            .filter(|v| v < lo || v > hi)
            .map(|v| format!("value {v} is outside [{lo}, {hi}]")),
        Rule::Matches(pattern) => value
            .as_text()
            .filter(|s| !pattern.regex().is_match(s))
            .map(|s| format!("'{s}' is not a valid {}", pattern.describe())),
    }
}
