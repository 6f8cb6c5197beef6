use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{ChatMessage, Message, Role};
use crate::store::ConversationStore;
use crate::utils::error::StoreError;

/// Prefix of the synthetic system message that carries the running summary.
pub const SUMMARY_PREFIX: &str = "Summary of earlier conversation:\n";

/// Literal left behind by tool invocations. Messages containing it never reach the model.
pub const TOOL_RESULT_PLACEHOLDER: &str = "[tool_result]";

pub fn summary_marker(summary: &str) -> ChatMessage {
    ChatMessage::system(format!("{}{}", SUMMARY_PREFIX, summary))
}

pub fn is_summary_marker(message: &ChatMessage) -> bool {
    message.role == Role::System && message.text.starts_with(SUMMARY_PREFIX)
}

pub fn is_noise(text: &str) -> bool {
    text.trim().is_empty() || text.contains(TOOL_RESULT_PLACEHOLDER)
}

/// Bridges the in-memory working set and the store for one
/// `(owner, conversation)` pair. Cheap; build one per turn.
#[derive(Clone)]
pub struct MemoryAdapter {
    store: Arc<dyn ConversationStore>,
    owner_id: String,
    conversation_id: String,
}

impl MemoryAdapter {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        owner_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            owner_id: owner_id.into(),
            conversation_id: conversation_id.into(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Summary marker (if any) followed by the active, non-system, non-noise turns.
    pub async fn load_working_set(&self) -> Result<Vec<ChatMessage>, StoreError> {
        let summary = self
            .store
            .summary(&self.owner_id, &self.conversation_id)
            .await?;
        let active = self
            .store
            .active_messages(&self.owner_id, &self.conversation_id)
            .await?;

        let mut working_set = Vec::with_capacity(active.len() + 1);
        if let Some(summary) = summary.filter(|s| !s.is_empty()) {
            working_set.push(summary_marker(&summary));
        }
        working_set.extend(
            active
                .iter()
                .filter(|m| m.role != Role::System && !is_noise(&m.text))
                .map(Message::to_chat_message),
        );

        debug!(
            "Loaded {} working-set messages for {}",
            working_set.len(),
            self.conversation_id
        );
        Ok(working_set)
    }

    /// Persist whatever in `messages` the store does not already hold as an
    /// active `(role, text)` pair. Returns how many were written.
    pub async fn persist_new_turns(&self, messages: &[ChatMessage]) -> Result<usize, StoreError> {
        let active = self
            .store
            .active_messages(&self.owner_id, &self.conversation_id)
            .await?;
        let mut present: HashSet<ChatMessage> =
            active.iter().map(Message::to_chat_message).collect();

        let mut written = 0;
        for message in messages {
            if is_summary_marker(message)
                || message.role == Role::System
                || is_noise(&message.text)
                || present.contains(message)
            {
                continue;
            }
            self.store
                .add_message(&self.owner_id, &self.conversation_id, message.role, &message.text)
                .await?;
            present.insert(message.clone());
            written += 1;
        }

        if written > 0 {
            debug!("Persisted {} new turns in {}", written, self.conversation_id);
        }
        Ok(written)
    }

    /// Ids of non-archived messages in creation order.
    pub async fn active_message_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .store
            .active_messages(&self.owner_id, &self.conversation_id)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    pub async fn archive(&self, message_ids: &[Uuid], summary: &str) -> Result<(), StoreError> {
        self.store
            .archive_and_summarize(&self.owner_id, &self.conversation_id, message_ids, summary)
            .await
    }

    pub async fn full_history(&self) -> Result<Vec<Message>, StoreError> {
        self.store
            .full_history(&self.owner_id, &self.conversation_id)
            .await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear(&self.owner_id, &self.conversation_id).await
    }
}
