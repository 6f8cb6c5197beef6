//! Ownership-scoped conversation persistence.
//!
//! One trait, three backends picked once at startup from `store.backend`:
//! - `memory`: process-local, lock-guarded state
//! - `json_file`: the same state serialized to a single JSON file
//! - `postgres`: sqlx, one transaction per atomic operation
//!
//! Every call validates the caller against the recorded owner before touching data.

#[cfg(test)]
mod conformance;
mod json_file;
mod memory;
mod ownership;
mod pool;
mod postgres;
mod state;

pub use json_file::JsonFileConversationStore;
pub use memory::InMemoryConversationStore;
pub use ownership::OwnershipCache;
pub use pool::DbPool;
pub use postgres::PgConversationStore;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::{Settings, StoreBackend};
use crate::models::{Attachment, Conversation, Message, Role};
use crate::utils::error::StoreError;

/// Conversation store port.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Idempotent create. `true` only when this call created the conversation.
    async fn create(&self, owner_id: &str, conversation_id: &str) -> Result<bool, StoreError>;

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError>;

    async fn set_title(
        &self,
        owner_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<(), StoreError>;

    /// All messages, archived included, in creation order.
    async fn full_history(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError>;

    /// Non-archived messages in creation order.
    async fn active_messages(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError>;

    async fn summary(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Appends a message, creating the conversation first if it does not exist.
    async fn add_message(
        &self,
        owner_id: &str,
        conversation_id: &str,
        role: Role,
        text: &str,
    ) -> Result<Message, StoreError>;

    /// Attaches to the most recent message with `role`, skipping `(url, kind)`
    /// pairs that message already carries.
    async fn attach_to_latest(
        &self,
        owner_id: &str,
        conversation_id: &str,
        role: Role,
        attachments: Vec<Attachment>,
    ) -> Result<(), StoreError>;

    /// Archives `message_ids` and replaces the summary. All or nothing.
    async fn archive_and_summarize(
        &self,
        owner_id: &str,
        conversation_id: &str,
        message_ids: &[Uuid],
        summary: &str,
    ) -> Result<(), StoreError>;

    /// Deletes every message and attachment and resets the summary. All or nothing.
    async fn clear(&self, owner_id: &str, conversation_id: &str) -> Result<(), StoreError>;
}

/// Build the configured backend. The postgres backend reuses `pool` when
/// given and connects on its own otherwise.
pub async fn build_store(
    settings: &Settings,
    pool: Option<DbPool>,
) -> Result<Arc<dyn ConversationStore>> {
    let store: Arc<dyn ConversationStore> = match settings.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory conversation store");
            Arc::new(InMemoryConversationStore::new())
        }
        StoreBackend::JsonFile => {
            info!("Using JSON file conversation store at {:?}", settings.store.json_path);
            Arc::new(JsonFileConversationStore::open(&settings.store.json_path).await?)
        }
        StoreBackend::Postgres => {
            let pool = match pool {
                Some(pool) => pool,
                None => DbPool::new(&settings.database).await?,
            };
            let store = PgConversationStore::new(
                pool,
                OwnershipCache::new(Duration::from_secs(settings.store.ownership_ttl_seconds)),
            );
            store.ensure_schema().await?;
            info!("Using PostgreSQL conversation store");
            Arc::new(store)
        }
    };
    Ok(store)
}

pub(crate) fn validate_ids(owner_id: &str, conversation_id: &str) -> Result<(), StoreError> {
    if owner_id.trim().is_empty() {
        return Err(StoreError::Validation("owner id must not be empty".to_string()));
    }
    if conversation_id.trim().is_empty() {
        return Err(StoreError::Validation(
            "conversation id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// De-duplicate while keeping first-seen order.
pub(crate) fn dedup_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
