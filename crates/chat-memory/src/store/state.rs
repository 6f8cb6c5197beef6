use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use super::{dedup_ids, validate_ids};
use crate::models::{Attachment, AttachmentKind, Conversation, Message, Role};
use crate::utils::error::StoreError;

/// Whole-store state shared by the in-memory and JSON file backends.
///
/// Every mutating method validates everything it needs before it changes
/// anything, so an `Err` always leaves the state as it was.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    #[serde(default)]
    conversations: BTreeMap<String, ConversationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConversationRecord {
    conversation: Conversation,
    #[serde(default)]
    messages: Vec<Message>,
}

impl StoreState {
    fn record(&self, owner_id: &str, conversation_id: &str) -> Result<&ConversationRecord, StoreError> {
        validate_ids(owner_id, conversation_id)?;
        let record = self
            .conversations
            .get(conversation_id)
            .ok_or_else(|| StoreError::conversation_not_found(conversation_id))?;
        if record.conversation.owner_id != owner_id {
            return Err(StoreError::owner_mismatch(owner_id, conversation_id));
        }
        Ok(record)
    }

    fn record_mut(
        &mut self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<&mut ConversationRecord, StoreError> {
        self.record(owner_id, conversation_id)?;
        self.conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::conversation_not_found(conversation_id))
    }

    pub fn create(&mut self, owner_id: &str, conversation_id: &str) -> Result<bool, StoreError> {
        validate_ids(owner_id, conversation_id)?;
        if let Some(existing) = self.conversations.get(conversation_id) {
            if existing.conversation.owner_id != owner_id {
                return Err(StoreError::owner_mismatch(owner_id, conversation_id));
            }
            return Ok(false);
        }
        self.conversations.insert(
            conversation_id.to_string(),
            ConversationRecord {
                conversation: Conversation::new(conversation_id, owner_id),
                messages: Vec::new(),
            },
        );
        Ok(true)
    }

    pub fn list_for_owner(&self, owner_id: &str) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self
            .conversations
            .values()
            .filter(|r| r.conversation.owner_id == owner_id)
            .map(|r| r.conversation.clone())
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    pub fn set_title(
        &mut self,
        owner_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<(), StoreError> {
        if title.trim().is_empty() {
            return Err(StoreError::Validation("title must not be empty".to_string()));
        }
        let record = self.record_mut(owner_id, conversation_id)?;
        record.conversation.title = title.trim().to_string();
        Ok(())
    }

    pub fn full_history(&self, owner_id: &str, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self.record(owner_id, conversation_id)?.messages.clone())
    }

    pub fn active_messages(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .record(owner_id, conversation_id)?
            .messages
            .iter()
            .filter(|m| !m.archived)
            .cloned()
            .collect())
    }

    pub fn summary(&self, owner_id: &str, conversation_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.record(owner_id, conversation_id)?.conversation.summary.clone())
    }

    pub fn add_message(
        &mut self,
        owner_id: &str,
        conversation_id: &str,
        role: Role,
        text: &str,
    ) -> Result<Message, StoreError> {
        self.create(owner_id, conversation_id)?;
        let record = self.record_mut(owner_id, conversation_id)?;
        let message = Message::new(conversation_id, role, text);
        record.messages.push(message.clone());
        Ok(message)
    }

    pub fn attach_to_latest(
        &mut self,
        owner_id: &str,
        conversation_id: &str,
        role: Role,
        attachments: Vec<Attachment>,
    ) -> Result<(), StoreError> {
        let record = self.record_mut(owner_id, conversation_id)?;
        if attachments.is_empty() {
            return Ok(());
        }
        let Some(target) = record.messages.iter_mut().rev().find(|m| m.role == role) else {
            return Ok(());
        };

        let mut seen: HashSet<(String, AttachmentKind)> = target
            .attachments
            .iter()
            .map(|a| (a.url.clone(), a.kind))
            .collect();
        for attachment in attachments {
            if seen.insert((attachment.url.clone(), attachment.kind)) {
                target.attachments.push(attachment);
            }
        }
        Ok(())
    }

    pub fn archive_and_summarize(
        &mut self,
        owner_id: &str,
        conversation_id: &str,
        message_ids: &[Uuid],
        summary: &str,
    ) -> Result<(), StoreError> {
        let record = self.record_mut(owner_id, conversation_id)?;
        let ids = dedup_ids(message_ids);

        let known: HashSet<Uuid> = record.messages.iter().map(|m| m.id).collect();
        if let Some(missing) = ids.iter().find(|id| !known.contains(id)) {
            return Err(StoreError::Persistence(format!(
                "message {} does not belong to conversation {}",
                missing, conversation_id
            )));
        }

        let targets: HashSet<Uuid> = ids.into_iter().collect();
        for message in record.messages.iter_mut() {
            if targets.contains(&message.id) {
                message.archived = true;
            }
        }
        record.conversation.summary = Some(summary.to_string());
        record.conversation.summary_updated_at = Some(Utc::now());
        Ok(())
    }

    pub fn clear(&mut self, owner_id: &str, conversation_id: &str) -> Result<(), StoreError> {
        let record = self.record_mut(owner_id, conversation_id)?;
        record.messages.clear();
        record.conversation.summary = None;
        record.conversation.summary_updated_at = None;
        Ok(())
    }
}
