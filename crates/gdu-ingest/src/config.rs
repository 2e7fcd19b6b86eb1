//! Run and database configuration
//!
//! Values are layered from built-in defaults, an optional JSON database descriptor,
//! environment variables (with `.env` support), and finally command-line flags.
//! [`RunConfig::validate`] and [`DatabaseConfig::validate`] run before any file is
//! touched.

use crate::error::{IngestError, IngestResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::path::{Path, PathBuf};

// ============================================================================
// Defaults
// ============================================================================

/// Default number of rows per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Default number of chunk workers in parallel mode.
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of files processed at once.
pub const DEFAULT_FILE_CONCURRENCY: usize = 1;

/// Default directory for table backups.
pub const DEFAULT_BACKUP_DIR: &str = "backups";

/// Default directory for QC reports.
pub const DEFAULT_QC_DIR: &str = "qc_reports";

/// Default destination schema.
pub const DEFAULT_SCHEMA: &str = "genomic";

/// Default database host.
pub const DEFAULT_DATABASE_HOST: &str = "localhost";

/// Default database port.
pub const DEFAULT_DATABASE_PORT: u16 = 5432;

/// Default database name.
pub const DEFAULT_DATABASE_NAME: &str = "genomic_data";

/// Default database user.
pub const DEFAULT_DATABASE_USER: &str = "postgres";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Run configuration
// ============================================================================

/// What happens to a file that has row-level errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// Invalid rows are excluded and the rest of the file proceeds
    #[default]
    Lenient,
    /// Any row-level error rejects the whole file
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub directory: PathBuf,
    /// Glob patterns relative to `directory`; empty means scan by extension
    pub file_patterns: Vec<String>,
    pub recursive: bool,
    pub chunk_size: usize,
    pub parallel: bool,
    pub workers: usize,
    pub file_concurrency: usize,
    pub dry_run: bool,
    pub backups_enabled: bool,
    pub backup_dir: PathBuf,
    pub qc_dir: PathBuf,
    pub policy: ValidationPolicy,
    /// Destination schema name
    pub schema: String,
    pub summary_out: Option<PathBuf>,
}

impl RunConfig {
    /// Defaults for the given input directory
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            file_patterns: Vec::new(),
            recursive: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallel: false,
            workers: DEFAULT_WORKERS,
            file_concurrency: DEFAULT_FILE_CONCURRENCY,
            dry_run: false,
            backups_enabled: true,
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            qc_dir: PathBuf::from(DEFAULT_QC_DIR),
            policy: ValidationPolicy::default(),
            schema: DEFAULT_SCHEMA.to_string(),
            summary_out: None,
        }
    }

    /// Number of chunk workers actually used
    pub fn effective_workers(&self) -> usize {
        if self.parallel {
            self.workers
        } else {
            1
        }
    }

    /// Whether table snapshots are taken this run
    pub fn backups_active(&self) -> bool {
        self.backups_enabled && !self.dry_run
    }

    pub fn validate(&self) -> IngestResult<()> {
        if self.chunk_size == 0 {
            return Err(IngestError::config("chunk size must be greater than 0"));
        }

        if self.workers == 0 {
            return Err(IngestError::config("worker count must be greater than 0"));
        }

        if self.file_concurrency == 0 {
            return Err(IngestError::config("file concurrency must be greater than 0"));
        }

        if !self.directory.is_dir() {
            return Err(IngestError::config(format!(
                "input directory {} does not exist",
                self.directory.display()
            )));
        }

        validate_identifier(&self.schema)?;

        Ok(())
    }
}

/// Reject schema names that cannot be used unquoted in DDL
pub fn validate_identifier(name: &str) -> IngestResult<()> {
    let valid = Regex::new(r"^[a-z_][a-z0-9_]*$")
        .map(|re| re.is_match(name))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(IngestError::config(format!(
            "schema name '{name}' must match ^[a-z_][a-z0-9_]*$"
        )))
    }
}

// ============================================================================
// Database configuration
// ============================================================================

/// Connection descriptor file written by database provisioning
#[derive(Debug, Clone, Default, Deserialize)]
struct DescriptorFile {
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Full connection URL; overrides the individual fields when set
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DATABASE_HOST.to_string(),
            port: DEFAULT_DATABASE_PORT,
            database: DEFAULT_DATABASE_NAME.to_string(),
            user: DEFAULT_DATABASE_USER.to_string(),
            password: None,
            url: None,
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the descriptor: defaults, then the optional JSON file, then environment
    pub fn load(descriptor: Option<&Path>) -> IngestResult<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Some(path) = descriptor {
            config.merge_descriptor(path)?;
        }
        config.merge_env();
        config.validate()?;

        Ok(config)
    }

    /// Overlay fields present in a `{host, port, database, user, password}` JSON file
    pub fn merge_descriptor(&mut self, path: &Path) -> IngestResult<()> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::config(format!(
                "cannot read database descriptor {}: {e}",
                path.display()
            ))
        })?;
        let file: DescriptorFile = serde_json::from_str(&content).map_err(|e| {
            IngestError::config(format!(
                "invalid database descriptor {}: {e}",
                path.display()
            ))
        })?;

        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(database) = file.database {
            self.database = database;
        }
        if let Some(user) = file.user {
            self.user = user;
        }
        if file.password.is_some() {
            self.password = file.password;
        }

        Ok(())
    }

    /// Overlay `GDU_DB_*` variables and `DATABASE_URL`
    pub fn merge_env(&mut self) {
        if let Ok(host) = std::env::var("GDU_DB_HOST") {
            self.host = host;
        }
        if let Some(port) = std::env::var("GDU_DB_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.port = port;
        }
        if let Ok(database) = std::env::var("GDU_DB_NAME") {
            self.database = database;
        }
        if let Ok(user) = std::env::var("GDU_DB_USER") {
            self.user = user;
        }
        if let Ok(password) = std::env::var("GDU_DB_PASSWORD") {
            self.password = Some(password);
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.url = Some(url);
        }
        if let Some(max) = std::env::var("GDU_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.max_connections = max;
        }
    }

    pub fn validate(&self) -> IngestResult<()> {
        if self.url.is_none() {
            if self.host.trim().is_empty() {
                return Err(IngestError::config("database host cannot be empty"));
            }
            if self.database.trim().is_empty() {
                return Err(IngestError::config("database name cannot be empty"));
            }
        }

        if self.max_connections == 0 {
            return Err(IngestError::config(
                "database max_connections must be greater than 0",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(IngestError::config(format!(
                "database min_connections ({}) cannot be greater than max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }

        Ok(())
    }

    /// Connection options for sqlx
    pub fn connect_options(&self) -> IngestResult<PgConnectOptions> {
        if let Some(url) = &self.url {
            return url
                .parse::<PgConnectOptions>()
                .map_err(|e| IngestError::config(format!("invalid DATABASE_URL: {e}")));
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user);
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        Ok(options)
    }
}
