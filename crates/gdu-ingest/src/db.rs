//! Connection pool setup

use crate::config::DatabaseConfig;
use crate::error::IngestResult;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Open a pool for the configured database
///
/// The pool is owned by the caller and handed to the store explicitly.
pub async fn create_pool(config: &DatabaseConfig) -> IngestResult<PgPool> {
    let options = config.connect_options()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_with(options)
        .await?;

    tracing::info!(
        host = %config.host,
        database = %config.database,
        max_connections = config.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> IngestResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
