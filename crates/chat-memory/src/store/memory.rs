use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::state::StoreState;
use super::ConversationStore;
use crate::models::{Attachment, Conversation, Message, Role};
use crate::utils::error::StoreError;

/// Process-local store. Each operation runs under a single lock acquisition,
/// which is what makes archive/clear atomic here.
#[derive(Default)]
pub struct InMemoryConversationStore {
    state: RwLock<StoreState>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(&self, owner_id: &str, conversation_id: &str) -> Result<bool, StoreError> {
        self.state.write().create(owner_id, conversation_id)
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError> {
        Ok(self.state.read().list_for_owner(owner_id))
    }

    async fn set_title(
        &self,
        owner_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<(), StoreError> {
        self.state.write().set_title(owner_id, conversation_id, title)
    }

    async fn full_history(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        self.state.read().full_history(owner_id, conversation_id)
    }

    async fn active_messages(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        self.state.read().active_messages(owner_id, conversation_id)
    }

    async fn summary(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Option<String>, StoreError> {
        self.state.read().summary(owner_id, conversation_id)
    }

    async fn add_message(
        &self,
        owner_id: &str,
        conversation_id: &str,
        role: Role,
        text: &str,
    ) -> Result<Message, StoreError> {
        let message = self
            .state
            .write()
            .add_message(owner_id, conversation_id, role, text)?;
        debug!("Stored {} message {} in {}", role, message.id, conversation_id);
        Ok(message)
    }

    async fn attach_to_latest(
        &self,
        owner_id: &str,
        conversation_id: &str,
        role: Role,
        attachments: Vec<Attachment>,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .attach_to_latest(owner_id, conversation_id, role, attachments)
    }

    async fn archive_and_summarize(
        &self,
        owner_id: &str,
        conversation_id: &str,
        message_ids: &[Uuid],
        summary: &str,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .archive_and_summarize(owner_id, conversation_id, message_ids, summary)?;
        debug!("Archived {} messages in {}", message_ids.len(), conversation_id);
        Ok(())
    }

    async fn clear(&self, owner_id: &str, conversation_id: &str) -> Result<(), StoreError> {
        self.state.write().clear(owner_id, conversation_id)
    }
}
