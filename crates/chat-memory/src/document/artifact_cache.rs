use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::types::Json;
use tracing::{debug, info};

use crate::store::DbPool;
use crate::utils::error::DocumentError;

/// Chunk lists keyed by canonical-URL hash.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactCache: Send + Sync {
    async fn get(&self, cache_key: &str) -> Result<Option<Vec<String>>, DocumentError>;

    /// Stores `chunks` for `cache_key`. An empty list is never stored.
    async fn put(
        &self,
        cache_key: &str,
        source_url: &str,
        chunks: &[String],
    ) -> Result<(), DocumentError>;
}

#[derive(Default)]
pub struct InMemoryArtifactCache {
    entries: DashMap<String, Vec<String>>,
}

impl InMemoryArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ArtifactCache for InMemoryArtifactCache {
    async fn get(&self, cache_key: &str) -> Result<Option<Vec<String>>, DocumentError> {
        Ok(self.entries.get(cache_key).map(|e| e.value().clone()))
    }

    async fn put(
        &self,
        cache_key: &str,
        source_url: &str,
        chunks: &[String],
    ) -> Result<(), DocumentError> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.entries.insert(cache_key.to_string(), chunks.to_vec());
        debug!("Cached {} chunks for {}", chunks.len(), source_url);
        Ok(())
    }
}

/// `document_artifacts` table, chunks stored as a JSONB array.
pub struct PgArtifactCache {
    pool: DbPool,
}

impl PgArtifactCache {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), DocumentError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS document_artifacts (
                   cache_key TEXT PRIMARY KEY,
                   source_url TEXT NOT NULL,
                   chunks JSONB NOT NULL,
                   created_at TIMESTAMPTZ NOT NULL DEFAULT now()
               )"#,
        )
        .execute(self.pool.pg())
        .await
        .map_err(|e| DocumentError::Cache(e.to_string()))?;
        info!("Artifact cache schema ready");
        Ok(())
    }
}

#[async_trait]
impl ArtifactCache for PgArtifactCache {
    async fn get(&self, cache_key: &str) -> Result<Option<Vec<String>>, DocumentError> {
        let row: Option<Json<Vec<String>>> =
            sqlx::query_scalar("SELECT chunks FROM document_artifacts WHERE cache_key = $1")
                .bind(cache_key)
                .fetch_optional(self.pool.pg())
                .await
                .map_err(|e| DocumentError::Cache(e.to_string()))?;

        Ok(row.map(|Json(chunks)| chunks))
    }

    async fn put(
        &self,
        cache_key: &str,
        source_url: &str,
        chunks: &[String],
    ) -> Result<(), DocumentError> {
        if chunks.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"INSERT INTO document_artifacts (cache_key, source_url, chunks, created_at)
               VALUES ($1, $2, $3, now())
               ON CONFLICT (cache_key) DO UPDATE SET
                   source_url = EXCLUDED.source_url,
                   chunks = EXCLUDED.chunks,
                   created_at = now()"#,
        )
        .bind(cache_key)
        .bind(source_url)
        .bind(Json(chunks))
        .execute(self.pool.pg())
        .await
        .map_err(|e| DocumentError::Cache(e.to_string()))?;

        debug!("Cached {} chunks for {}", chunks.len(), source_url);
        Ok(())
    }
}
