//! Input discovery and delimited file reading

use crate::config::RunConfig;
use crate::error::{IngestError, IngestResult};
use crate::types::RawRow;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions considered when scanning a directory, optionally followed by `.gz`
pub const CANDIDATE_EXTENSIONS: &[&str] =
    &["tsv", "txt", "tab", "cns", "cnr", "vcf", "maf", "bed", "csv"];

/// Whether a path looks like an ingestible file
pub fn is_candidate(path: &Path) -> bool {
    crate::schema::detect::extension_hint(path)
        .is_some_and(|ext| CANDIDATE_EXTENSIONS.iter().any(|c| *c == ext))
}

/// List input files in lexicographic path order
///
/// Explicit glob patterns are resolved relative to the input directory. Without
/// patterns the directory is scanned for candidate extensions, recursively when asked.
pub fn scan(config: &RunConfig) -> IngestResult<Vec<PathBuf>> {
    let mut files = Vec::new();

    if config.file_patterns.is_empty() {
        let max_depth = if config.recursive { usize::MAX } else { 1 };
        for entry in WalkDir::new(&config.directory).max_depth(max_depth) {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            if entry.file_type().is_file() && is_candidate(entry.path()) {
                files.push(entry.into_path());
            }
        }
    } else {
        for pattern in &config.file_patterns {
            let full = config.directory.join(pattern);
            let full = full.to_string_lossy();
            let entries = glob::glob(&full).map_err(|e| {
                IngestError::config(format!("Invalid file pattern '{pattern}': {e}"))
            })?;

            let before = files.len();
            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() => files.push(path),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Unreadable path while matching pattern"),
                }
            }
            if files.len() == before {
                tracing::warn!(pattern = %pattern, "No files found matching pattern");
            }
        }
    }

    files.sort();
    files.dedup();

    tracing::info!(
        directory = %config.directory.display(),
        count = files.len(),
        "Scanned input files"
    );

    Ok(files)
}

/// File name up to the first `.`, used as a fallback sample id
pub fn file_stem(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .and_then(|n| n.split('.').next().map(str::to_string))
        .unwrap_or_default()
}

/// Field delimiter for a path: comma for `.csv`, tab otherwise
pub fn delimiter_for(path: &Path) -> u8 {
    match crate::schema::detect::extension_hint(path).as_deref() {
        Some("csv") => b',',
        _ => b'\t',
    }
}

/// Header name in canonical form: `#` and surrounding space stripped, lowercased,
/// spaces and dashes turned into underscores
pub fn normalize_header(name: &str) -> String {
    name.trim()
        .trim_start_matches('#')
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// A delimited file split into header and data rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    /// Normalized header names
    pub header: Vec<String>,
    pub rows: Vec<RawRow>,
    pub delimiter: u8,
    header_line: Vec<String>,
}

impl RawTable {
    /// Reinterpret the header line as the first data row under the given column names
    pub fn into_headerless(self, columns: &[&str]) -> RawTable {
        let mut rows = Vec::with_capacity(self.rows.len() + 1);
        rows.push(RawRow {
            row: 1,
            fields: self.header_line,
        });
        rows.extend(self.rows.into_iter().map(|mut r| {
            r.row += 1;
            r
        }));

        RawTable {
            header: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            delimiter: self.delimiter,
            header_line: Vec::new(),
        }
    }
}

fn open(path: &Path) -> IngestResult<BufReader<Box<dyn Read + Send>>> {
    let file = File::open(path)?;
    let is_gzip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    let reader: Box<dyn Read + Send> = if is_gzip {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(BufReader::new(reader))
}

fn split_line(line: &str, delimiter: u8) -> IngestResult<Vec<String>> {
    let mut reader = csv_reader(delimiter, line.as_bytes());
    let mut record = csv::StringRecord::new();
    reader.read_record(&mut record)?;
    Ok(record.iter().map(str::to_string).collect())
}

fn csv_reader<R: Read>(delimiter: u8, reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        // Tab-separated genomic files carry literal quotes inside INFO and annotation fields.
        .quoting(delimiter == b',')
        .from_reader(reader)
}

/// Consume blank and `#` meta lines and return the header line fields
fn read_header<R: BufRead>(reader: &mut R, delimiter: u8) -> IngestResult<Option<Vec<String>>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() {
            continue;
        }
        if trimmed.starts_with('#') && !trimmed.as_bytes().contains(&delimiter) {
            continue;
        }
        return split_line(trimmed, delimiter).map(Some);
    }
}

/// Read only the normalized header of a file
pub fn peek_header(path: &Path) -> IngestResult<Vec<String>> {
    let delimiter = delimiter_for(path);
    let mut reader = open(path)?;
    let header = read_header(&mut reader, delimiter)?.unwrap_or_default();
    Ok(header.iter().map(|h| normalize_header(h)).collect())
}

/// Read a whole file into a [`RawTable`]
///
/// Gzip input is decompressed transparently. Rows keep their raw text; blank rows are
/// dropped and numbering starts at 1 for the first data row.
pub fn read_table(path: &Path) -> IngestResult<RawTable> {
    let delimiter = delimiter_for(path);
    let mut reader = open(path)?;
    let header_line = read_header(&mut reader, delimiter)?.unwrap_or_default();

    let mut rows = Vec::new();
    for record in csv_reader(delimiter, reader).records() {
        let record = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        rows.push(RawRow {
            row: rows.len() + 1,
            fields: record.iter().map(str::to_string).collect(),
        });
    }

    tracing::debug!(
        path = %path.display(),
        columns = header_line.len(),
        rows = rows.len(),
        "Read delimited file"
    );

    Ok(RawTable {
        header: header_line.iter().map(|h| normalize_header(h)).collect(),
        rows,
        delimiter,
        header_line,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("#CHROM"), "chrom");
        assert_eq!(normalize_header(" Sample Name "), "sample_name");
        assert_eq!(normalize_header("Tumor-Seq-Allele2"), "tumor_seq_allele2");
    }

    #[test]
    fn test_file_stem_and_delimiter() {
        assert_eq!(file_stem(Path::new("/data/S01.call.cns")), "S01");
        assert_eq!(delimiter_for(Path::new("clinical.csv")), b',');
        assert_eq!(delimiter_for(Path::new("clinical.csv.gz")), b',');
        assert_eq!(delimiter_for(Path::new("calls.vcf")), b'\t');
    }

    #[test]
    fn test_read_vcf_skips_meta_lines() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "S1.vcf",
            "##fileformat=VCFv4.2\n##source=caller\n#CHROM\tPOS\tID\tREF\tALT\n\
             chr1\t100\t.\tA\tT\n\nchr2\t200\trs1\tG\tC\n",
        );

        let table = read_table(&path).unwrap();
        assert_eq!(table.header, vec!["chrom", "pos", "id", "ref", "alt"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].row, 2);
        assert_eq!(table.rows[1].fields[3], "G");
        assert_eq!(peek_header(&path).unwrap(), table.header);
    }

    #[test]
    fn test_read_gzip_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clinical.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder
            .write_all(b"Patient_ID,Sample_ID,Diagnosis\nP1,S1,\"Adenocarcinoma, lung\"\n")
            .unwrap();
        encoder.finish().unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.delimiter, b',');
        assert_eq!(table.header, vec!["patient_id", "sample_id", "diagnosis"]);
        assert_eq!(table.rows[0].fields[2], "Adenocarcinoma, lung");
    }

    #[test]
    fn test_into_headerless() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "peaks.bed", "chr1\t10\t20\tp1\nchr1\t30\t40\tp2\n");
        let table = read_table(&path)
            .unwrap()
            .into_headerless(&["chromosome", "start", "stop", "name"]);
        assert_eq!(table.header, vec!["chromosome", "start", "stop", "name"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].fields, vec!["chr1", "10", "20", "p1"]);
        assert_eq!(table.rows[1].row, 2);
    }

    #[test]
    fn test_scan_orders_and_filters() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.tsv", "x\n");
        write(dir.path(), "a.cns", "x\n");
        write(dir.path(), "notes.md", "x\n");
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write(&dir.path().join("nested"), "c.vcf.gz", "x\n");

        let mut config = RunConfig::new(dir.path());
        let names = |files: Vec<PathBuf>| -> Vec<String> {
            files
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };

        assert_eq!(names(scan(&config).unwrap()), vec!["a.cns", "b.tsv"]);

        config.recursive = true;
        assert_eq!(
            names(scan(&config).unwrap()),
            vec!["a.cns", "b.tsv", "c.vcf.gz"]
        );

        config.recursive = false;
        config.file_patterns = vec!["*.tsv".into(), "missing_*.txt".into()];
        assert_eq!(names(scan(&config).unwrap()), vec!["b.tsv"]);
    }
}
