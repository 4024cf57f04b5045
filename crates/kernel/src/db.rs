//! Database connection management.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::adapter::{DatabaseAdapter, MemoryAdapter, PgDocumentAdapter};
use crate::config::Config;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Build the document adapter selected by the configuration.
///
/// Uses PostgreSQL when `DATABASE_URL` is set, otherwise an in-memory store
/// that lives as long as the process.
pub async fn connect(config: &Config) -> Result<Arc<dyn DatabaseAdapter>> {
    match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, config.database_max_connections).await?;
            let adapter = PgDocumentAdapter::new(pool)
                .await
                .context("failed to prepare PostgreSQL document store")?;
            info!(adapter = "postgres", "database adapter ready");
            Ok(Arc::new(adapter))
        }
        None => {
            info!(
                adapter = "memory",
                "DATABASE_URL not set, using in-memory adapter; state is lost on exit"
            );
            Ok(Arc::new(MemoryAdapter::new()))
        }
    }
}
