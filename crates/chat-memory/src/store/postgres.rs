use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{dedup_ids, validate_ids, ConversationStore, DbPool, OwnershipCache};
use crate::models::{Attachment, AttachmentKind, Conversation, Message, Role};
use crate::utils::error::StoreError;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS conversations (
           id TEXT PRIMARY KEY,
           owner_id TEXT NOT NULL,
           title TEXT NOT NULL,
           summary TEXT,
           summary_updated_at TIMESTAMPTZ,
           created_at TIMESTAMPTZ NOT NULL DEFAULT now()
       )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_conversations_owner
           ON conversations (owner_id, created_at DESC)"#,
    r#"CREATE TABLE IF NOT EXISTS messages (
           id UUID PRIMARY KEY,
           conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
           role TEXT NOT NULL,
           text TEXT NOT NULL,
           archived BOOLEAN NOT NULL DEFAULT FALSE,
           created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
           seq BIGSERIAL
       )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_messages_conversation
           ON messages (conversation_id, seq)"#,
    r#"CREATE TABLE IF NOT EXISTS attachments (
           id BIGSERIAL PRIMARY KEY,
           message_id UUID NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
           kind TEXT NOT NULL,
           url TEXT NOT NULL,
           mime_type TEXT,
           title TEXT,
           position INT NOT NULL
       )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_attachments_message
           ON attachments (message_id, position)"#,
];

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: String,
    owner_id: String,
    title: String,
    summary: Option<String>,
    summary_updated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            summary: row.summary,
            summary_updated_at: row.summary_updated_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: String,
    role: String,
    text: String,
    archived: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct AttachmentRow {
    message_id: Uuid,
    kind: String,
    url: String,
    mime_type: Option<String>,
    title: Option<String>,
}

impl TryFrom<AttachmentRow> for Attachment {
    type Error = StoreError;

    fn try_from(row: AttachmentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: row.kind.parse::<AttachmentKind>().map_err(StoreError::Persistence)?,
            url: row.url,
            mime_type: row.mime_type,
            title: row.title,
        })
    }
}

/// PostgreSQL-backed store.
pub struct PgConversationStore {
    pool: DbPool,
    ownership: OwnershipCache,
}

impl PgConversationStore {
    pub fn new(pool: DbPool, ownership: OwnershipCache) -> Self {
        Self { pool, ownership }
    }

    /// Create tables and indexes when missing. Safe to call on every start.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(self.pool.pg()).await?;
        }
        info!("Conversation schema ready");
        Ok(())
    }

    async fn check_owner(&self, owner_id: &str, conversation_id: &str) -> Result<(), StoreError> {
        validate_ids(owner_id, conversation_id)?;
        if self.ownership.is_verified(owner_id, conversation_id) {
            return Ok(());
        }

        let recorded: Option<String> =
            sqlx::query_scalar("SELECT owner_id FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .fetch_optional(self.pool.pg())
                .await?;

        match recorded {
            None => Err(StoreError::conversation_not_found(conversation_id)),
            Some(recorded) if recorded != owner_id => {
                Err(StoreError::owner_mismatch(owner_id, conversation_id))
            }
            Some(_) => {
                self.ownership.remember(owner_id, conversation_id);
                Ok(())
            }
        }
    }

    /// Row-locks the conversation for the rest of `tx` and checks its owner.
    async fn lock_conversation(
        tx: &mut Transaction<'_, Postgres>,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<(), StoreError> {
        validate_ids(owner_id, conversation_id)?;
        let recorded: Option<String> =
            sqlx::query_scalar("SELECT owner_id FROM conversations WHERE id = $1 FOR UPDATE")
                .bind(conversation_id)
                .fetch_optional(&mut **tx)
                .await?;

        match recorded {
            None => Err(StoreError::conversation_not_found(conversation_id)),
            Some(recorded) if recorded != owner_id => {
                Err(StoreError::owner_mismatch(owner_id, conversation_id))
            }
            Some(_) => Ok(()),
        }
    }

    async fn load_messages(
        &self,
        conversation_id: &str,
        only_active: bool,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"SELECT id, conversation_id, role, text, archived, created_at
               FROM messages
               WHERE conversation_id = $1 AND (NOT $2 OR archived = FALSE)
               ORDER BY seq"#,
        )
        .bind(conversation_id)
        .bind(only_active)
        .fetch_all(self.pool.pg())
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let attachment_rows = sqlx::query_as::<_, AttachmentRow>(
            r#"SELECT message_id, kind, url, mime_type, title
               FROM attachments
               WHERE message_id = ANY($1)
               ORDER BY message_id, position"#,
        )
        .bind(&ids)
        .fetch_all(self.pool.pg())
        .await?;

        let mut by_message: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
        for row in attachment_rows {
            let message_id = row.message_id;
            by_message
                .entry(message_id)
                .or_default()
                .push(Attachment::try_from(row)?);
        }

        rows.into_iter()
            .map(|row| {
                let role = row.role.parse::<Role>().map_err(StoreError::Persistence)?;
                Ok(Message {
                    attachments: by_message.remove(&row.id).unwrap_or_default(),
                    id: row.id,
                    conversation_id: row.conversation_id,
                    role,
                    text: row.text,
                    archived: row.archived,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn create(&self, owner_id: &str, conversation_id: &str) -> Result<bool, StoreError> {
        validate_ids(owner_id, conversation_id)?;

        let inserted: Option<String> = sqlx::query_scalar(
            r#"INSERT INTO conversations (id, owner_id, title, created_at)
               VALUES ($1, $2, $1, $3)
               ON CONFLICT (id) DO NOTHING
               RETURNING id"#,
        )
        .bind(conversation_id)
        .bind(owner_id)
        .bind(Utc::now())
        .fetch_optional(self.pool.pg())
        .await?;

        if inserted.is_some() {
            self.ownership.remember(owner_id, conversation_id);
            debug!("Created conversation {} for {}", conversation_id, owner_id);
            return Ok(true);
        }

        self.check_owner(owner_id, conversation_id).await?;
        Ok(false)
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"SELECT id, owner_id, title, summary, summary_updated_at, created_at
               FROM conversations
               WHERE owner_id = $1
               ORDER BY created_at DESC"#,
        )
        .bind(owner_id)
        .fetch_all(self.pool.pg())
        .await?;

        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    async fn set_title(
        &self,
        owner_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<(), StoreError> {
        if title.trim().is_empty() {
            return Err(StoreError::Validation("title must not be empty".to_string()));
        }
        self.check_owner(owner_id, conversation_id).await?;

        sqlx::query("UPDATE conversations SET title = $2 WHERE id = $1")
            .bind(conversation_id)
            .bind(title.trim())
            .execute(self.pool.pg())
            .await?;
        Ok(())
    }

    async fn full_history(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        self.check_owner(owner_id, conversation_id).await?;
        self.load_messages(conversation_id, false).await
    }

    async fn active_messages(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        self.check_owner(owner_id, conversation_id).await?;
        self.load_messages(conversation_id, true).await
    }

    async fn summary(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Option<String>, StoreError> {
        self.check_owner(owner_id, conversation_id).await?;
        let summary: Option<String> =
            sqlx::query_scalar("SELECT summary FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .fetch_one(self.pool.pg())
                .await?;
        Ok(summary)
    }

    async fn add_message(
        &self,
        owner_id: &str,
        conversation_id: &str,
        role: Role,
        text: &str,
    ) -> Result<Message, StoreError> {
        self.create(owner_id, conversation_id).await?;

        let message = Message::new(conversation_id, role, text);
        sqlx::query(
            r#"INSERT INTO messages (id, conversation_id, role, text, archived, created_at)
               VALUES ($1, $2, $3, $4, FALSE, $5)"#,
        )
        .bind(message.id)
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(text)
        .bind(message.created_at)
        .execute(self.pool.pg())
        .await?;

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
        self.check_owner(owner_id, conversation_id).await?;
        if attachments.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.pg().begin().await?;

        let target: Option<Uuid> = sqlx::query_scalar(
            r#"SELECT id FROM messages
               WHERE conversation_id = $1 AND role = $2
               ORDER BY seq DESC
               LIMIT 1
               FOR UPDATE"#,
        )
        .bind(conversation_id)
        .bind(role.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(message_id) = target else {
            debug!("No {} message in {} to attach to", role, conversation_id);
            return Ok(());
        };

        let existing: Vec<(String, String)> =
            sqlx::query_as("SELECT url, kind FROM attachments WHERE message_id = $1")
                .bind(message_id)
                .fetch_all(&mut *tx)
                .await?;

        let mut position = existing.len() as i32;
        let mut seen: HashSet<(String, String)> = existing.into_iter().collect();

        for attachment in attachments {
            if !seen.insert((attachment.url.clone(), attachment.kind.as_str().to_string())) {
                continue;
            }
            sqlx::query(
                r#"INSERT INTO attachments (message_id, kind, url, mime_type, title, position)
                   VALUES ($1, $2, $3, $4, $5, $6)"#,
            )
            .bind(message_id)
            .bind(attachment.kind.as_str())
            .bind(&attachment.url)
            .bind(&attachment.mime_type)
            .bind(&attachment.title)
            .bind(position)
            .execute(&mut *tx)
            .await?;
            position += 1;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn archive_and_summarize(
        &self,
        owner_id: &str,
        conversation_id: &str,
        message_ids: &[Uuid],
        summary: &str,
    ) -> Result<(), StoreError> {
        let ids = dedup_ids(message_ids);
        let mut tx = self.pool.pg().begin().await?;
        Self::lock_conversation(&mut tx, owner_id, conversation_id).await?;

        if !ids.is_empty() {
            let updated = sqlx::query(
                r#"UPDATE messages SET archived = TRUE
                   WHERE conversation_id = $1 AND id = ANY($2)"#,
            )
            .bind(conversation_id)
            .bind(&ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated != ids.len() as u64 {
                // dropping tx rolls back the partial update
                warn!(
                    "Archive in {} matched {} of {} messages, rolling back",
                    conversation_id,
                    updated,
                    ids.len()
                );
                return Err(StoreError::Persistence(format!(
                    "{} of {} messages do not belong to conversation {}",
                    ids.len() as u64 - updated,
                    ids.len(),
                    conversation_id
                )));
            }
        }

        sqlx::query(
            "UPDATE conversations SET summary = $2, summary_updated_at = $3 WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(summary)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Archived {} messages in {}", ids.len(), conversation_id);
        Ok(())
    }

    async fn clear(&self, owner_id: &str, conversation_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.pg().begin().await?;
        Self::lock_conversation(&mut tx, owner_id, conversation_id).await?;

        // attachments go with their messages via ON DELETE CASCADE
        let deleted = sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            "UPDATE conversations SET summary = NULL, summary_updated_at = NULL WHERE id = $1",
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("Cleared {} messages from {}", deleted, conversation_id);
        Ok(())
    }
}
