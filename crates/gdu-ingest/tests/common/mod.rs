//! Shared helpers for integration tests
//!
//! File fixtures live in a [`Workspace`] backed by a temporary directory. PostgreSQL
//! tests start a throwaway container with [`TestPostgres`]; they need Docker and are
//! marked `#[ignore]`.

#![allow(dead_code)]

use anyhow::{Context, Result};
use gdu_ingest::config::RunConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;

/// Initialize tracing for tests, once
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,gdu_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

/// Input, backup and QC directories under one temporary root
pub struct Workspace {
    root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir_all(root.path().join("in")).expect("Failed to create input dir");
        Self { root }
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.path().join("in")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.path().join("backups")
    }

    pub fn qc_dir(&self) -> PathBuf {
        self.root.path().join("qc")
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Write an input file and return its path
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.input_dir().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create fixture dir");
        }
        std::fs::write(&path, content).expect("Failed to write fixture");
        path
    }

    /// Run configuration pointing at this workspace
    pub fn config(&self) -> RunConfig {
        let mut config = RunConfig::new(self.input_dir());
        config.backup_dir = self.backup_dir();
        config.qc_dir = self.qc_dir();
        config
    }

    /// Run configuration restricted to the given file patterns
    pub fn config_for(&self, patterns: &[&str]) -> RunConfig {
        let mut config = self.config();
        config.file_patterns = patterns.iter().map(|p| p.to_string()).collect();
        config
    }

    pub fn files_in(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default();
        files.sort();
        files
    }
}

/// Tumor mutational burden file, one `(sample, tmb)` per row
pub fn tmb_file(rows: &[(&str, f64)]) -> String {
    let mut content = String::from("Sample\tTMB\n");
    for (sample, tmb) in rows {
        content.push_str(&format!("{sample}\t{tmb}\n"));
    }
    content
}

/// Copy-number segments, one `(chromosome, start, end, log2)` per row
pub fn cnv_file(rows: &[(&str, i64, i64, f64)]) -> String {
    let mut content = String::from("chromosome\tstart\tend\tgene\tlog2\n");
    for (chrom, start, end, log2) in rows {
        content.push_str(&format!("{chrom}\t{start}\t{end}\tGENE\t{log2}\n"));
    }
    content
}

pub const SMALL_VCF: &str = "##fileformat=VCFv4.2\n\
##source=caller\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr1\t12345\trs1\tA\tG\t50\tPASS\tDP=10\n\
chr2\t500\t.\tC\tT,A\t.\tPASS\tDP=4\n\
chrX\t77\t.\tG\t<DEL>\t12.5\tq10\t.\n";

/// PostgreSQL test container with a connected pool
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;
        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
