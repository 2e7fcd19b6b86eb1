//! File type detection from a normalized header

use super::{schema_for, FileSchema};
use crate::error::{IngestError, IngestResult};
use crate::types::FileType;
use std::path::Path;

/// Lowercase extension of a path, looking through a trailing `.gz`
pub fn extension_hint(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
}

fn header_has(header: &[String], aliases: &[&str]) -> bool {
    header.iter().any(|h| aliases.iter().any(|alias| *alias == h.as_str()))
}

/// Whether every required field of the schema is resolvable from the header
pub fn matches_header(schema: &FileSchema, header: &[String]) -> bool {
    schema
        .required_fields()
        .all(|field| header_has(header, field.aliases))
}

/// Classify a file by its header
///
/// The schema with the most required columns wins. Ties go to the type whose extension
/// matches the file, then to declaration order. The extension never overrides the header.
pub fn detect(path: &Path, header: &[String]) -> IngestResult<FileType> {
    let hint = extension_hint(path);
    let hinted = |schema: &FileSchema| {
        hint.as_deref()
            .is_some_and(|ext| schema.extensions.iter().any(|e| *e == ext))
    };

    let mut best: Option<&FileSchema> = None;
    for file_type in FileType::ALL {
        let schema = schema_for(file_type);
        if !matches_header(schema, header) {
            continue;
        }
        best = match best {
            None => Some(schema),
            Some(current) => {
                let (a, b) = (schema.required_count(), current.required_count());
                if a > b || (a == b && hinted(schema) && !hinted(current)) {
                    Some(schema)
                } else {
                    Some(current)
                }
            }
        };
    }

    match best {
        Some(schema) => {
            tracing::debug!(
                path = %path.display(),
                file_type = %schema.file_type,
                "Detected file type"
            );
            Ok(schema.file_type)
        }
        None => Err(IngestError::UnsupportedFileType {
            path: path.to_path_buf(),
            header: header.join(", "),
        }),
    }
}

/// Schema to apply when the first line is data rather than a header
///
/// Only types that declare a headerless column order qualify, and only when the file's
/// extension names that type.
pub fn detect_headerless(path: &Path, first_line: &[String]) -> Option<FileType> {
    let hint = extension_hint(path)?;
    FileType::ALL.into_iter().find(|file_type| {
        let schema = schema_for(*file_type);
        match schema.headerless_columns {
            Some(columns) => {
                schema.extensions.iter().any(|e| *e == hint)
                    && first_line.len() >= schema.required_count()
                    && first_line.len() <= columns.len()
            }
            None => false,
        }
    })
}
