use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::{CacheBackend, Settings, StoreBackend};
use crate::document::{
    ArtifactCache, DocumentContextBuilder, DocumentParser, HttpFetcher, InMemoryArtifactCache,
    PgArtifactCache,
};
use crate::services::{ChatModel, ChatTurnService, HttpLlmClient, Summarizer, WindowConfig};
use crate::store::{build_store, ConversationStore, DbPool};
use crate::utils::token_estimator::GraphemeTokenEstimator;

/// Everything a serving layer needs, wired from `Settings`.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<dyn ConversationStore>,
    pub turns: Arc<ChatTurnService>,
}

impl AppState {
    /// Wire the configured store and document cache with the HTTP LLM client.
    pub async fn new(settings: Settings) -> Result<Self> {
        let llm = Arc::new(HttpLlmClient::new(settings.llm.clone())?);
        Self::with_models(settings, llm.clone(), llm).await
    }

    /// Same wiring with caller-supplied model collaborators.
    pub async fn with_models(
        settings: Settings,
        summarizer: Arc<dyn Summarizer>,
        model: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let needs_pool = settings.store.backend == StoreBackend::Postgres
            || settings.documents.cache_backend == CacheBackend::Postgres;
        let pool = if needs_pool {
            Some(DbPool::new(&settings.database).await?)
        } else {
            None
        };

        let store = build_store(&settings, pool.clone()).await?;
        let cache = build_artifact_cache(&settings, pool).await?;

        let documents = Arc::new(DocumentContextBuilder::new(
            Arc::new(HttpFetcher::from_config(&settings.documents)?),
            Arc::new(DocumentParser::new()),
            cache,
            &settings.documents,
        ));

        let turns = ChatTurnService::new(
            store.clone(),
            summarizer,
            model,
            Arc::new(GraphemeTokenEstimator::default()),
            WindowConfig::from(&settings.memory),
            settings.prompts.clone(),
        )
        .with_documents(documents);

        info!(
            "Chat memory ready (store: {:?}, artifact cache: {:?})",
            settings.store.backend, settings.documents.cache_backend
        );

        Ok(Self {
            settings,
            store,
            turns: Arc::new(turns),
        })
    }
}

async fn build_artifact_cache(
    settings: &Settings,
    pool: Option<DbPool>,
) -> Result<Arc<dyn ArtifactCache>> {
    match (settings.documents.cache_backend, pool) {
        (CacheBackend::Postgres, Some(pool)) => {
            let cache = PgArtifactCache::new(pool);
            cache.ensure_schema().await?;
            Ok(Arc::new(cache))
        }
        (CacheBackend::Postgres, None) => {
            let cache = PgArtifactCache::new(DbPool::new(&settings.database).await?);
            cache.ensure_schema().await?;
            Ok(Arc::new(cache))
        }
        (CacheBackend::Memory, _) => Ok(Arc::new(InMemoryArtifactCache::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm_service::{MockChatModel, MockSummarizer};

    #[tokio::test]
    async fn test_default_settings_wire_an_in_memory_service() {
        let mut model = MockChatModel::new();
        model.expect_complete().returning(|_| Ok("pong".to_string()));

        let state = AppState::with_models(
            Settings::default(),
            Arc::new(MockSummarizer::new()),
            Arc::new(model),
        )
        .await
        .unwrap();

        let outcome = state.turns.run_turn("alice", "c1", "ping").await.unwrap();
        assert_eq!(outcome.reply, "pong");
        assert_eq!(state.store.full_history("alice", "c1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_http_client_wiring_does_not_connect_eagerly() {
        let state = AppState::new(Settings::default()).await.unwrap();
        assert!(state.store.list_for_owner("nobody").await.unwrap().is_empty());
    }
}
