use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

/// Postgres connections shared by the conversation store and the artifact
/// cache. Cloning hands out another handle to the same pool.
#[derive(Clone)]
pub struct DbPool {
    inner: PgPool,
}

impl DbPool {
    /// Connects and round-trips a `SELECT 1` before returning.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let inner = PgPoolOptions::new()
            .max_connections(config.pool_max_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_seconds))
            .connect(&config.url)
            .await
            .context("Could not open conversation database pool")?;

        sqlx::query("SELECT 1")
            .execute(&inner)
            .await
            .context("Conversation database did not answer the liveness query")?;
        info!(
            "Conversation database ready ({} connections max)",
            config.pool_max_size
        );

        Ok(Self { inner })
    }

    pub fn from_pool(inner: PgPool) -> Self {
        Self { inner }
    }

    pub fn pg(&self) -> &PgPool {
        &self.inner
    }

    pub async fn close(&self) {
        self.inner.close().await;
    }
}
