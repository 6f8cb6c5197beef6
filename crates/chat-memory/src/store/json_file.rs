use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::state::StoreState;
use super::ConversationStore;
use crate::models::{Attachment, Conversation, Message, Role};
use crate::utils::error::StoreError;

/// Store persisted as one pretty-printed JSON document.
///
/// Writes apply to a copy of the state, the copy is written to a temp file in
/// the same directory and renamed over the target, and only then does the copy
/// replace the in-memory state. A failed write changes neither.
pub struct JsonFileConversationStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileConversationStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => StoreState::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No conversation file at {:?}, starting empty", path);
                StoreState::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = op(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| StoreError::Persistence(format!("write task failed: {}", e)))?
            .inspect_err(|e| error!("Failed to persist conversation file: {}", e))
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| StoreError::Persistence(e.to_string()))?;

    debug!("Wrote {} bytes to {:?}", bytes.len(), path);
    Ok(())
}

#[async_trait]
impl ConversationStore for JsonFileConversationStore {
    async fn create(&self, owner_id: &str, conversation_id: &str) -> Result<bool, StoreError> {
        {
            let state = self.state.lock().await;
            // avoid a rewrite when nothing changes
            if state.summary(owner_id, conversation_id).is_ok() {
                return Ok(false);
            }
        }
        self.mutate(|s| s.create(owner_id, conversation_id)).await
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError> {
        Ok(self.state.lock().await.list_for_owner(owner_id))
    }

    async fn set_title(
        &self,
        owner_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<(), StoreError> {
        self.mutate(|s| s.set_title(owner_id, conversation_id, title))
            .await
    }

    async fn full_history(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        self.state.lock().await.full_history(owner_id, conversation_id)
    }

    async fn active_messages(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        self.state.lock().await.active_messages(owner_id, conversation_id)
    }

    async fn summary(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Option<String>, StoreError> {
        self.state.lock().await.summary(owner_id, conversation_id)
    }

    async fn add_message(
        &self,
        owner_id: &str,
        conversation_id: &str,
        role: Role,
        text: &str,
    ) -> Result<Message, StoreError> {
        self.mutate(|s| s.add_message(owner_id, conversation_id, role, text))
            .await
    }

    async fn attach_to_latest(
        &self,
        owner_id: &str,
        conversation_id: &str,
        role: Role,
        attachments: Vec<Attachment>,
    ) -> Result<(), StoreError> {
        self.mutate(|s| s.attach_to_latest(owner_id, conversation_id, role, attachments))
            .await
    }

    async fn archive_and_summarize(
        &self,
        owner_id: &str,
        conversation_id: &str,
        message_ids: &[Uuid],
        summary: &str,
    ) -> Result<(), StoreError> {
        self.mutate(|s| s.archive_and_summarize(owner_id, conversation_id, message_ids, summary))
            .await
    }

    async fn clear(&self, owner_id: &str, conversation_id: &str) -> Result<(), StoreError> {
        self.mutate(|s| s.clear(owner_id, conversation_id)).await
    }
}
