//! GDU Ingest - genomic file upload tool

use anyhow::{Context, Result};
use clap::Parser;
use gdu_common::logging::{init_logging, LogConfig, LogLevel};
use gdu_ingest::config::{
    DatabaseConfig, RunConfig, ValidationPolicy, DEFAULT_BACKUP_DIR, DEFAULT_CHUNK_SIZE,
    DEFAULT_FILE_CONCURRENCY, DEFAULT_QC_DIR, DEFAULT_SCHEMA, DEFAULT_WORKERS,
};
use gdu_ingest::db::{create_pool, health_check};
use gdu_ingest::pipeline::{Pipeline, EXIT_ABORTED};
use gdu_ingest::storage::PgStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "gdu-ingest")]
#[command(author, version, about = "Validate, deduplicate and upload genomic record files")]
struct Cli {
    /// Directory containing the files to ingest
    directory: PathBuf,

    /// Glob patterns relative to the directory, instead of scanning by extension
    #[arg(short, long)]
    files: Vec<String>,

    /// Scan subdirectories too
    #[arg(short, long)]
    recursive: bool,

    /// JSON database descriptor ({host, port, database, user, password})
    #[arg(long, env = "GDU_DB_CONFIG")]
    db_config: Option<PathBuf>,

    /// Rows per chunk
    #[arg(long, env = "GDU_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Process chunks on a pool of workers
    #[arg(long)]
    parallel: bool,

    /// Chunk workers in parallel mode
    #[arg(long, env = "GDU_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Files processed at the same time
    #[arg(long, default_value_t = DEFAULT_FILE_CONCURRENCY)]
    file_concurrency: usize,

    /// Run through deduplication and reporting without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Skip table backups
    #[arg(long)]
    no_backup: bool,

    /// Where table backups are written
    #[arg(long, env = "GDU_BACKUP_DIR", default_value = DEFAULT_BACKUP_DIR)]
    backup_dir: PathBuf,

    /// Where QC reports are written
    #[arg(long, env = "GDU_QC_DIR", default_value = DEFAULT_QC_DIR)]
    qc_dir: PathBuf,

    /// Reject any file that has row-level errors
    #[arg(long)]
    strict: bool,

    /// Destination schema
    #[arg(long, env = "GDU_SCHEMA", default_value = DEFAULT_SCHEMA)]
    schema: String,

    /// Also write the run summary as JSON
    #[arg(long)]
    summary_out: Option<PathBuf>,

    /// Log to this file as well as the console
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        let mut config = RunConfig::new(&self.directory);
        config.file_patterns = self.files.clone();
        config.recursive = self.recursive;
        config.chunk_size = self.chunk_size;
        config.parallel = self.parallel;
        config.workers = self.workers;
        config.file_concurrency = self.file_concurrency;
        config.dry_run = self.dry_run;
        config.backups_enabled = !self.no_backup;
        config.backup_dir = self.backup_dir.clone();
        config.qc_dir = self.qc_dir.clone();
        config.policy = if self.strict {
            ValidationPolicy::Strict
        } else {
            ValidationPolicy::Lenient
        };
        config.schema = self.schema.clone();
        config.summary_out = self.summary_out.clone();
        config
    }

    fn log_config(&self) -> Result<LogConfig> {
        let level = if self.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        };

        let mut builder = LogConfig::builder()
            .level(level)
            .log_file_prefix("gdu-ingest");
        if let Some(path) = &self.log_file {
            builder = builder.log_file(path);
        }

        // Environment variables take precedence
        builder.build().merge_env().context("Invalid logging environment")
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.log_config()?).context("Failed to initialize logging")?;

    let run_config = cli.run_config();
    if let Err(e) = run_config.validate() {
        error!(error = %e, "Invalid run configuration");
        eprintln!("Error: {e}");
        return Ok(ExitCode::from(EXIT_ABORTED));
    }

    let db_config = match DatabaseConfig::load(cli.db_config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid database configuration");
            eprintln!("Error: {e}");
            return Ok(ExitCode::from(EXIT_ABORTED));
        }
    };

    let pool = create_pool(&db_config)
        .await
        .context("Failed to connect to the destination database")?;
    health_check(&pool).await.context("Database health check failed")?;

    let store = PgStore::new(pool.clone(), run_config.schema.clone())?;
    let pipeline = Pipeline::new(run_config, Arc::new(store));

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing files in flight");
            cancel.cancel();
        }
    });

    let outcome = pipeline.run().await?;
    pool.close().await;

    println!(
        "{} file(s): {} succeeded, {} rows inserted, {} duplicates skipped",
        outcome.results.len(),
        outcome.results.iter().filter(|r| r.succeeded).count(),
        outcome.results.iter().map(|r| r.rows_inserted).sum::<u64>(),
        outcome
            .results
            .iter()
            .map(|r| r.rows_skipped_as_duplicate)
            .sum::<u64>(),
    );
    if let Some(path) = &outcome.report_path {
        println!("QC report: {}", path.display());
    }
    if let Some(reason) = &outcome.abort_reason {
        eprintln!("Run aborted: {reason}");
    }

    info!(exit_code = outcome.exit_code(), "Done");
    Ok(ExitCode::from(outcome.exit_code()))
}
