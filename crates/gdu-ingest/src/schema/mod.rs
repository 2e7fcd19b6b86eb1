//! Per-file-type schemas
//!
//! Every [`FileType`] maps to one [`FileSchema`] entry: its typed fields (with header
//! aliases and value rules), cross-field rules, the identifying tuple used for the
//! record hash, and extension hints used during detection. Adding or changing a layout
//! means editing data here, not branching in the stages.

pub mod detect;
pub mod validate;

use crate::types::FileType;
use regex::Regex;
use std::sync::LazyLock;

pub use detect::detect;
pub use validate::{check_row, validate_header, ColumnMap};

/// How a raw text field is converted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// Whole number, `12` and `12.0` both accepted
    Integer,
    Float,
    /// `chr` prefix stripped, uppercased, X/Y/M mapped to 23/24/MT
    Chromosome,
    /// Uppercased nucleotide string or symbolic allele
    Allele,
}

impl FieldKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Integer => "BIGINT",
            FieldKind::Float => "DOUBLE PRECISION",
            FieldKind::Text | FieldKind::Chromosome | FieldKind::Allele => "TEXT",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::Integer | FieldKind::Float)
    }
}

/// Named text patterns used by value rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    SampleId,
    Allele,
    Breakpoint,
    Strand,
}

static SAMPLE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9\-_.]+$").unwrap_or_else(|e| unreachable!("sample id regex: {e}"))
});
static ALLELE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[ACGTN*\-]+|<[A-Z0-9:_]+>)(?:,(?:[ACGTN*\-]+|<[A-Z0-9:_]+>))*$")
        .unwrap_or_else(|e| unreachable!("allele regex: {e}"))
});
static BREAKPOINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:chr)?[0-9A-Za-z_.]+:[0-9]+:[+-]$")
        .unwrap_or_else(|e| unreachable!("breakpoint regex: {e}"))
});
static STRAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+.\-]$").unwrap_or_else(|e| unreachable!("strand regex: {e}")));

impl Pattern {
    pub fn regex(&self) -> &'static Regex {
        match self {
            Pattern::SampleId => &SAMPLE_ID_RE,
            Pattern::Allele => &ALLELE_RE,
            Pattern::Breakpoint => &BREAKPOINT_RE,
            Pattern::Strand => &STRAND_RE,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Pattern::SampleId => "sample identifier of letters, digits, '-', '_' or '.'",
            Pattern::Allele => "nucleotide or symbolic allele",
            Pattern::Breakpoint => "breakpoint as chr:pos:strand",
            Pattern::Strand => "strand '+', '-' or '.'",
        }
    }
}

/// Value rule applied after coercion
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    Min(f64),
    Range(f64, f64),
    Matches(Pattern),
}

/// Rule spanning two fields of the same record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrossRule {
    /// `start <= stop` whenever both are set
    Ordered {
        start: &'static str,
        stop: &'static str,
    },
}

#[derive(Debug)]
pub struct FieldSpec {
    /// Canonical column name, also the destination column
    pub name: &'static str,
    /// Normalized header names accepted for this field
    pub aliases: &'static [&'static str],
    pub kind: FieldKind,
    pub required: bool,
    /// Take the value from the file name when the column is absent
    pub stem_fallback: bool,
    pub rules: &'static [Rule],
}

impl FieldSpec {
    const fn required(
        name: &'static str,
        aliases: &'static [&'static str],
        kind: FieldKind,
        rules: &'static [Rule],
    ) -> Self {
        Self {
            name,
            aliases,
            kind,
            required: true,
            stem_fallback: false,
            rules,
        }
    }

    const fn optional(
        name: &'static str,
        aliases: &'static [&'static str],
        kind: FieldKind,
        rules: &'static [Rule],
    ) -> Self {
        Self {
            name,
            aliases,
            kind,
            required: false,
            stem_fallback: false,
            rules,
        }
    }

    const fn from_stem(mut self) -> Self {
        self.stem_fallback = true;
        self
    }
}

#[derive(Debug)]
pub struct FileSchema {
    pub file_type: FileType,
    pub fields: &'static [FieldSpec],
    pub cross_rules: &'static [CrossRule],
    /// Fields hashed, in order, to identify a logical record
    pub identity: &'static [&'static str],
    /// Lowercase extensions (without `.gz`) that hint at this type
    pub extensions: &'static [&'static str],
    /// Column order for files that carry no header line
    pub headerless_columns: Option<&'static [&'static str]>,
}

impl FileSchema {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn required_count(&self) -> usize {
        self.required_fields().count()
    }

    pub fn table_name(&self) -> String {
        self.file_type.table_name()
    }
}

pub fn schema_for(file_type: FileType) -> &'static FileSchema {
    match file_type {
        FileType::Tmb => &TMB,
        FileType::Cnv => &CNV,
        FileType::Vcf => &VCF,
        FileType::Maf => &MAF,
        FileType::Expression => &EXPRESSION,
        FileType::Fusion => &FUSION,
        FileType::Clinical => &CLINICAL,
        FileType::Bed => &BED,
    }
}

use FieldKind::{Allele, Chromosome, Float, Integer, Text};

const NON_NEGATIVE: &[Rule] = &[Rule::Min(0.0)];
const FRACTION: &[Rule] = &[Rule::Range(0.0, 1.0)];
const SAMPLE: &[Rule] = &[Rule::Matches(Pattern::SampleId)];
const ALLELE: &[Rule] = &[Rule::Matches(Pattern::Allele)];
const BREAKPOINT: &[Rule] = &[Rule::Matches(Pattern::Breakpoint)];
const NONE: &[Rule] = &[];
const START_STOP: &[CrossRule] = &[CrossRule::Ordered {
    start: "start",
    stop: "stop",
}];

static TMB: FileSchema = FileSchema {
    file_type: FileType::Tmb,
    fields: &[
        FieldSpec::required("sample", &["samplename", "sample_name", "sample"], Text, SAMPLE),
        FieldSpec::required("tmb", &["tmb", "faf"], Float, NON_NEGATIVE),
        FieldSpec::optional("binomial_low", &["binomial_low", "fad"], Float, FRACTION),
        FieldSpec::optional("binomial_high", &["binomial_high", "frd"], Float, FRACTION),
    ],
    cross_rules: &[],
    identity: &["sample", "tmb"],
    extensions: &[],
    headerless_columns: None,
};

static CNV: FileSchema = FileSchema {
    file_type: FileType::Cnv,
    fields: &[
        FieldSpec::optional("sample", &["sample", "samplename", "sample_name"], Text, SAMPLE)
            .from_stem(),
        FieldSpec::required("chromosome", &["chromosome", "chrom", "chr"], Chromosome, NONE),
        FieldSpec::required("start", &["start"], Integer, NON_NEGATIVE),
        FieldSpec::required("stop", &["stop", "end"], Integer, NON_NEGATIVE),
        FieldSpec::optional("gene", &["gene"], Text, NONE),
        FieldSpec::required("log2", &["log2"], Float, NONE),
        FieldSpec::optional("cn", &["cn"], Integer, NON_NEGATIVE),
        FieldSpec::optional("depth", &["depth"], Float, NON_NEGATIVE),
        FieldSpec::optional("probes", &["probes"], Integer, NON_NEGATIVE),
        FieldSpec::optional("weight", &["weight"], Float, NONE),
        FieldSpec::optional("ci_hi", &["ci_hi"], Float, NONE),
        FieldSpec::optional("ci_lo", &["ci_lo"], Float, NONE),
    ],
    cross_rules: START_STOP,
    identity: &["sample", "chromosome", "start", "stop"],
    extensions: &["cns", "cnr"],
    headerless_columns: None,
};

static VCF: FileSchema = FileSchema {
    file_type: FileType::Vcf,
    fields: &[
        FieldSpec::optional("sample", &["sample", "samplename", "sample_name"], Text, SAMPLE)
            .from_stem(),
        FieldSpec::required("chromosome", &["chromosome", "chrom"], Chromosome, NONE),
        FieldSpec::required("pos", &["pos"], Integer, &[Rule::Min(1.0)]),
        FieldSpec::optional("variant_id", &["variant_id", "id"], Text, NONE),
        FieldSpec::required("ref", &["ref"], Allele, ALLELE),
        FieldSpec::required("alt", &["alt"], Allele, ALLELE),
        FieldSpec::optional("qual", &["qual"], Float, NON_NEGATIVE),
        FieldSpec::optional("filter", &["filter"], Text, NONE),
        FieldSpec::optional("info", &["info"], Text, NONE),
        FieldSpec::optional("af", &["af"], Float, FRACTION),
        FieldSpec::optional("depth", &["depth", "dp"], Integer, NON_NEGATIVE),
        FieldSpec::optional("gene", &["gene"], Text, NONE),
    ],
    cross_rules: &[],
    identity: &["sample", "chromosome", "pos", "ref", "alt"],
    extensions: &["vcf"],
    headerless_columns: None,
};

static MAF: FileSchema = FileSchema {
    file_type: FileType::Maf,
    fields: &[
        FieldSpec::required("gene", &["gene", "hugo_symbol"], Text, NONE),
        FieldSpec::required("chromosome", &["chromosome"], Chromosome, NONE),
        FieldSpec::required("start", &["start", "start_position"], Integer, NON_NEGATIVE),
        FieldSpec::required("stop", &["stop", "end_position"], Integer, NON_NEGATIVE),
        FieldSpec::required("ref", &["ref", "reference_allele"], Allele, ALLELE),
        FieldSpec::required("alt", &["alt", "tumor_seq_allele2"], Allele, ALLELE),
        FieldSpec::required("sample", &["sample", "tumor_sample_barcode"], Text, SAMPLE),
        FieldSpec::optional("variant_classification", &["variant_classification"], Text, NONE),
        FieldSpec::optional("t_ref_count", &["t_ref_count"], Integer, NON_NEGATIVE),
        FieldSpec::optional("t_alt_count", &["t_alt_count"], Integer, NON_NEGATIVE),
    ],
    cross_rules: START_STOP,
    identity: &["sample", "chromosome", "start", "stop", "ref", "alt"],
    extensions: &["maf"],
    headerless_columns: None,
};

static EXPRESSION: FileSchema = FileSchema {
    file_type: FileType::Expression,
    fields: &[
        FieldSpec::required(
            "gene",
            &["gene", "gene_id", "gene_name", "gene_symbol"],
            Text,
            NONE,
        ),
        FieldSpec::required(
            "sample",
            &["sample", "samplename", "sample_name", "name"],
            Text,
            SAMPLE,
        ),
        FieldSpec::required(
            "value",
            &["value", "tpm", "fpkm", "expression", "mean_coverage", "count"],
            Float,
            NON_NEGATIVE,
        ),
        FieldSpec::optional("unit", &["unit"], Text, NONE),
    ],
    cross_rules: &[],
    identity: &["sample", "gene", "value"],
    extensions: &[],
    headerless_columns: None,
};

static FUSION: FileSchema = FileSchema {
    file_type: FileType::Fusion,
    fields: &[
        FieldSpec::optional("sample", &["sample", "samplename", "sample_name"], Text, SAMPLE)
            .from_stem(),
        FieldSpec::required("fusion_name", &["fusion_name", "fusionname"], Text, NONE),
        FieldSpec::required("left_gene", &["left_gene", "leftgene"], Text, NONE),
        FieldSpec::required(
            "left_breakpoint",
            &["left_breakpoint", "leftbreakpoint"],
            Text,
            BREAKPOINT,
        ),
        FieldSpec::required("right_gene", &["right_gene", "rightgene"], Text, NONE),
        FieldSpec::required(
            "right_breakpoint",
            &["right_breakpoint", "rightbreakpoint"],
            Text,
            BREAKPOINT,
        ),
        FieldSpec::optional(
            "junction_read_count",
            &["junction_read_count", "junctionreadcount"],
            Integer,
            NON_NEGATIVE,
        ),
        FieldSpec::optional(
            "spanning_frag_count",
            &["spanning_frag_count", "spanningfragcount"],
            Integer,
            NON_NEGATIVE,
        ),
    ],
    cross_rules: &[],
    identity: &["sample", "fusion_name", "left_breakpoint", "right_breakpoint"],
    extensions: &[],
    headerless_columns: None,
};

static CLINICAL: FileSchema = FileSchema {
    file_type: FileType::Clinical,
    fields: &[
        FieldSpec::required("patient", &["patient", "patient_id"], Text, NONE),
        FieldSpec::required("sample", &["sample", "sample_id", "samplename"], Text, SAMPLE),
        FieldSpec::optional("age", &["age"], Float, &[Rule::Range(0.0, 150.0)]),
        FieldSpec::optional("sex", &["sex", "gender"], Text, NONE),
        FieldSpec::optional("diagnosis", &["diagnosis"], Text, NONE),
        FieldSpec::optional("stage", &["stage"], Text, NONE),
        FieldSpec::optional("vital_status", &["vital_status"], Text, NONE),
        FieldSpec::optional("os_months", &["os_months"], Float, NON_NEGATIVE),
    ],
    cross_rules: &[],
    identity: &["patient", "sample"],
    extensions: &[],
    headerless_columns: None,
};

static BED: FileSchema = FileSchema {
    file_type: FileType::Bed,
    fields: &[
        FieldSpec::required("chromosome", &["chromosome", "chrom"], Chromosome, NONE),
        FieldSpec::required("start", &["start", "chromstart"], Integer, NON_NEGATIVE),
        FieldSpec::required("stop", &["stop", "chromend", "end"], Integer, NON_NEGATIVE),
        FieldSpec::optional("name", &["name"], Text, NONE),
        FieldSpec::optional("score", &["score"], Float, NONE),
        FieldSpec::optional("strand", &["strand"], Text, &[Rule::Matches(Pattern::Strand)]),
    ],
    cross_rules: START_STOP,
    identity: &["chromosome", "start", "stop", "name", "strand"],
    extensions: &["bed"],
    headerless_columns: Some(&["chromosome", "start", "stop", "name", "score", "strand"]),
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BOOKKEEPING_COLUMNS, ID_COLUMN};
    use std::collections::HashSet;

    #[test]
    fn test_every_schema_is_consistent() {
        for file_type in FileType::ALL {
            let schema = file_type.schema();
            assert_eq!(schema.file_type, file_type);
            assert!(schema.required_count() > 0, "{file_type} has no required fields");

            for name in schema.identity {
                assert!(
                    schema.field_index(name).is_some(),
                    "{file_type} identity field {name} not declared"
                );
            }
            for field in schema.fields {
                assert!(
                    field.aliases.contains(&field.name),
                    "{file_type}.{} must accept its own name",
                    field.name
                );
            }
            let mut names = HashSet::new();
            for field in schema.fields {
                assert!(names.insert(field.name), "{file_type}.{} declared twice", field.name);
                assert_ne!(field.name, ID_COLUMN, "{file_type} field shadows the table key");
                assert!(
                    !BOOKKEEPING_COLUMNS.contains(&field.name),
                    "{file_type}.{} clashes with a bookkeeping column",
                    field.name
                );
            }
            for CrossRule::Ordered { start, stop } in schema.cross_rules {
                assert!(schema.field_index(start).is_some());
                assert!(schema.field_index(stop).is_some());
            }
        }
    }

    #[test]
    fn test_patterns() {
        assert!(Pattern::SampleId.regex().is_match("TCGA-AB-1234.01_A"));
        assert!(!Pattern::SampleId.regex().is_match("sample 1"));
        assert!(Pattern::Allele.regex().is_match("ACGT"));
        assert!(Pattern::Allele.regex().is_match("A,<DEL>"));
        assert!(Pattern::Allele.regex().is_match("-"));
        assert!(!Pattern::Allele.regex().is_match("XYZ"));
        assert!(Pattern::Breakpoint.regex().is_match("chr7:55242464:+"));
        assert!(!Pattern::Breakpoint.regex().is_match("chr7:55242464"));
        assert!(Pattern::Strand.regex().is_match("."));
        assert!(!Pattern::Strand.regex().is_match("*"));
    }

    #[test]
    fn test_sql_types() {
        assert_eq!(FieldKind::Integer.sql_type(), "BIGINT");
        assert_eq!(FieldKind::Float.sql_type(), "DOUBLE PRECISION");
        assert_eq!(FieldKind::Chromosome.sql_type(), "TEXT");
    }
}
