use thiserror::Error;

/// Errors surfaced by a conversation store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl StoreError {
    pub fn conversation_not_found(conversation_id: &str) -> Self {
        Self::NotFound(format!("conversation {}", conversation_id))
    }

    pub fn owner_mismatch(owner_id: &str, conversation_id: &str) -> Self {
        Self::Forbidden(format!(
            "owner {} may not access conversation {}",
            owner_id, conversation_id
        ))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", e);
        Self::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        tracing::error!("I/O error: {}", e);
        Self::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        tracing::error!("Serialization error: {}", e);
        Self::Persistence(e.to_string())
    }
}

/// Errors a chat turn can fail with. Summarization and document grounding
/// failures never show up here; they degrade in place.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Model error: {0}")]
    Model(String),
}

impl MemoryError {
    /// True for ownership and lookup failures a caller should show to the user as-is.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Forbidden(_))
                | Self::Store(StoreError::NotFound(_))
                | Self::Store(StoreError::Validation(_))
        )
    }
}

/// Failures inside the document grounding pipeline. Always absorbed by the
/// context builder.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Document too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Artifact cache error: {0}")]
    Cache(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        let forbidden: MemoryError = StoreError::owner_mismatch("bob", "c1").into();
        assert!(forbidden.is_client_error());

        let persistence: MemoryError = StoreError::Persistence("disk full".into()).into();
        assert!(!persistence.is_client_error());
        assert!(!MemoryError::Model("timeout".into()).is_client_error());
    }

    #[test]
    fn test_messages_name_the_conversation() {
        let err = StoreError::conversation_not_found("c-42");
        assert_eq!(err.to_string(), "Not found: conversation c-42");
    }
}
