use reqwest::Url;
use std::sync::Arc;
use tracing::{debug, info};

use super::conversation::{MemoryAdapter, SummarizingWindow, WindowConfig};
use super::llm_service::{ChatModel, Summarizer};
use crate::config::PromptsConfig;
use crate::document::{canonicalize, extract_first_url, DocumentContextBuilder};
use crate::models::{Attachment, AttachmentKind, ChatMessage, Conversation, Message, Role};
use crate::store::ConversationStore;
use crate::utils::error::MemoryError;
use crate::utils::token_estimator::TokenEstimator;

/// Extensions treated as documents worth grounding on rather than plain links.
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "docx", "doc", "txt", "md", "rtf", "odt", "html", "htm"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply: String,
    /// Canonical URL of the document used for grounding, if any context was built.
    pub grounded_on: Option<String>,
    /// Window estimate after the reply was added.
    pub token_count: usize,
}

/// One user turn end to end: remember the message, ground on a pasted link,
/// ask the model, remember the reply.
pub struct ChatTurnService {
    store: Arc<dyn ConversationStore>,
    summarizer: Arc<dyn Summarizer>,
    model: Arc<dyn ChatModel>,
    estimator: Arc<dyn TokenEstimator>,
    documents: Option<Arc<DocumentContextBuilder>>,
    window_config: WindowConfig,
    prompts: PromptsConfig,
}

impl ChatTurnService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        summarizer: Arc<dyn Summarizer>,
        model: Arc<dyn ChatModel>,
        estimator: Arc<dyn TokenEstimator>,
        window_config: WindowConfig,
        prompts: PromptsConfig,
    ) -> Self {
        Self {
            store,
            summarizer,
            model,
            estimator,
            documents: None,
            window_config,
            prompts,
        }
    }

    pub fn with_documents(mut self, documents: Arc<DocumentContextBuilder>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub async fn run_turn(
        &self,
        owner_id: &str,
        conversation_id: &str,
        user_text: &str,
    ) -> Result<TurnOutcome, MemoryError> {
        if self.store.create(owner_id, conversation_id).await? {
            info!("Started conversation {} for {}", conversation_id, owner_id);
        }

        let adapter = MemoryAdapter::new(self.store.clone(), owner_id, conversation_id);
        let mut window = SummarizingWindow::load(
            adapter,
            self.summarizer.clone(),
            self.estimator.clone(),
            self.window_config,
        )
        .await?;

        window.add(ChatMessage::user(user_text)).await?;

        let mut grounding = None;
        if let Some(url) = extract_first_url(user_text) {
            self.store
                .attach_to_latest(owner_id, conversation_id, Role::User, vec![attachment_for(&url)])
                .await?;
            if let Some(documents) = &self.documents {
                grounding = documents
                    .build_context(&url, user_text)
                    .await
                    .map(|context| (canonicalize(&url), context));
            }
        }

        let mut prompt = vec![ChatMessage::system(self.prompts.system_prompt.clone())];
        if let Some((_, context)) = &grounding {
            prompt.push(ChatMessage::system(format!(
                "{}{}",
                self.prompts.grounding_prefix, context
            )));
        }
        prompt.extend(window.messages());

        debug!(
            "Prompting model with {} messages for {}",
            prompt.len(),
            conversation_id
        );
        let reply = self
            .model
            .complete(&prompt)
            .await
            .map_err(|e| MemoryError::Model(e.to_string()))?;

        window.add(ChatMessage::ai(reply.clone())).await?;

        Ok(TurnOutcome {
            reply,
            grounded_on: grounding.map(|(url, _)| url),
            token_count: window.token_count(),
        })
    }

    /// Full history, archived messages included, for display.
    pub async fn history(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, MemoryError> {
        Ok(self.store.full_history(owner_id, conversation_id).await?)
    }

    pub async fn clear(&self, owner_id: &str, conversation_id: &str) -> Result<(), MemoryError> {
        Ok(self.store.clear(owner_id, conversation_id).await?)
    }

    pub async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, MemoryError> {
        Ok(self.store.list_for_owner(owner_id).await?)
    }

    pub async fn rename(
        &self,
        owner_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<(), MemoryError> {
        Ok(self.store.set_title(owner_id, conversation_id, title).await?)
    }
}

/// `Document` for links whose path looks like a file we can read, `Link` otherwise.
pub fn attachment_for(url: &str) -> Attachment {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();
    let file_name = path.rsplit('/').next().unwrap_or_default().to_string();
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    if !DOCUMENT_EXTENSIONS.contains(&extension.as_str()) {
        return Attachment::new(AttachmentKind::Link, url);
    }

    let mut attachment = Attachment::new(AttachmentKind::Document, url).with_title(file_name);
    if let Some(mime) = mime_guess::from_path(&path).first_raw() {
        attachment = attachment.with_mime_type(mime);
    }
    attachment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocumentConfig;
    use crate::document::fetcher::{FetchedDocument, MockDocumentFetcher};
    use crate::document::{DocumentParser, InMemoryArtifactCache};
    use crate::services::llm_service::{MockChatModel, MockSummarizer};
    use crate::store::InMemoryConversationStore;
    use crate::utils::error::StoreError;
    use crate::utils::token_estimator::GraphemeTokenEstimator;

    fn service(store: Arc<InMemoryConversationStore>, model: MockChatModel) -> ChatTurnService {
        ChatTurnService::new(
            store,
            Arc::new(MockSummarizer::new()),
            Arc::new(model),
            Arc::new(GraphemeTokenEstimator::default()),
            WindowConfig::default(),
            PromptsConfig::default(),
        )
    }

    #[test]
    fn test_attachment_kind_from_path() {
        let pdf = attachment_for("https://h/files/report.PDF?alt=media&token=x");
        assert_eq!(pdf.kind, AttachmentKind::Document);
        assert_eq!(pdf.title.as_deref(), Some("report.PDF"));
        assert_eq!(pdf.mime_type.as_deref(), Some("application/pdf"));

        assert_eq!(attachment_for("https://news.site/story").kind, AttachmentKind::Link);
        assert_eq!(attachment_for("https://h/image.png").kind, AttachmentKind::Link);
    }

    #[tokio::test]
    async fn test_turn_persists_both_sides() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut model = MockChatModel::new();
        model
            .expect_complete()
            .withf(|messages: &[ChatMessage]| {
                messages.len() == 2
                    && messages[0].role == Role::System
                    && messages[1] == ChatMessage::user("hello there")
            })
            .times(1)
            .returning(|_| Ok("hi!".to_string()));

        let outcome = service(store.clone(), model)
            .run_turn("alice", "c1", "hello there")
            .await
            .unwrap();

        assert_eq!(outcome.reply, "hi!");
        assert_eq!(outcome.grounded_on, None);
        let texts: Vec<String> = store
            .full_history("alice", "c1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["hello there", "hi!"]);
    }

    #[tokio::test]
    async fn test_model_failure_keeps_user_message() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut model = MockChatModel::new();
        model
            .expect_complete()
            .returning(|_| Err(anyhow::anyhow!("connection reset")));

        let err = service(store.clone(), model)
            .run_turn("alice", "c1", "are you there?")
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Model(_)));
        assert_eq!(store.full_history("alice", "c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_conversation_is_rejected_before_model_call() {
        let store = Arc::new(InMemoryConversationStore::new());
        store.create("alice", "c1").await.unwrap();
        let mut model = MockChatModel::new();
        model.expect_complete().never();

        let err = service(store, model)
            .run_turn("mallory", "c1", "let me in")
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Store(StoreError::Forbidden(_))));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_linked_document_grounds_the_prompt() {
        let store = Arc::new(InMemoryConversationStore::new());

        let mut fetcher = MockDocumentFetcher::new();
        fetcher.expect_fetch().times(1).returning(|_| {
            Ok(FetchedDocument {
                bytes: bytes::Bytes::from_static(b"The launch date is March 3rd."),
                content_type: Some("text/plain".to_string()),
            })
        });
        let documents = Arc::new(DocumentContextBuilder::new(
            Arc::new(fetcher),
            Arc::new(DocumentParser::new()),
            Arc::new(InMemoryArtifactCache::new()),
            &DocumentConfig::default(),
        ));

        let mut model = MockChatModel::new();
        model
            .expect_complete()
            .withf(|messages: &[ChatMessage]| {
                messages.len() == 3
                    && messages[1].role == Role::System
                    && messages[1].text.contains("[1] The launch date is March 3rd.")
            })
            .times(1)
            .returning(|_| Ok("March 3rd.".to_string()));

        let outcome = service(store.clone(), model)
            .with_documents(documents)
            .run_turn("alice", "c1", "when is launch? https://h/plan.txt?token=abc")
            .await
            .unwrap();

        assert_eq!(outcome.grounded_on.as_deref(), Some("https://h/plan.txt"));
        let history = store.full_history("alice", "c1").await.unwrap();
        assert_eq!(history[0].attachments.len(), 1);
        assert_eq!(history[0].attachments[0].kind, AttachmentKind::Document);
        assert!(history[1].attachments.is_empty());
    }

    #[tokio::test]
    async fn test_listing_rename_and_clear() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut model = MockChatModel::new();
        model.expect_complete().returning(|_| Ok("ok".to_string()));
        let service = service(store, model);

        service.run_turn("alice", "c1", "first").await.unwrap();
        service.rename("alice", "c1", "Groceries").await.unwrap();

        let list = service.list_conversations("alice").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title, "Groceries");

        service.clear("alice", "c1").await.unwrap();
        assert!(service.history("alice", "c1").await.unwrap().is_empty());
    }
}
