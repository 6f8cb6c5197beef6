use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::memory_adapter::{is_summary_marker, summary_marker, MemoryAdapter, SUMMARY_PREFIX};
use crate::config::MemoryConfig;
use crate::models::ChatMessage;
use crate::services::llm_service::Summarizer;
use crate::utils::error::MemoryError;
use crate::utils::token_estimator::TokenEstimator;

const SUMMARY_INSTRUCTIONS: &str = "Write a compact summary of the conversation below. \
Keep the facts, decisions and user preferences someone would need to pick the \
conversation up again; drop greetings and filler.\n\n";

const DEGRADED_WITH_PREVIOUS: &str = " [Additional context available]";
const DEGRADED_WITHOUT_PREVIOUS: &str = "[Conversation history available]";

/// The final exchange is never evicted, whatever the configuration says.
pub const MIN_KEEP_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub max_tokens: usize,
    /// Trailing messages that are never evicted. Floored at `MIN_KEEP_COUNT`.
    pub keep_count: usize,
    /// Tokens reserved for the summary that will replace the evicted prefix.
    pub summary_buffer: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            keep_count: 2,
            summary_buffer: 200,
        }
    }
}

impl From<&MemoryConfig> for WindowConfig {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            keep_count: config.keep_count,
            summary_buffer: config.summary_buffer,
        }
    }
}

/// Token-bounded working set. When a new message pushes the estimate over
/// budget, the oldest messages are folded into a single summary marker and
/// archived in the store.
pub struct SummarizingWindow {
    adapter: MemoryAdapter,
    summarizer: Arc<dyn Summarizer>,
    estimator: Arc<dyn TokenEstimator>,
    config: WindowConfig,
    messages: Vec<ChatMessage>,
}

impl SummarizingWindow {
    pub async fn load(
        adapter: MemoryAdapter,
        summarizer: Arc<dyn Summarizer>,
        estimator: Arc<dyn TokenEstimator>,
        config: WindowConfig,
    ) -> Result<Self, MemoryError> {
        let messages = adapter.load_working_set().await?;
        Ok(Self {
            adapter,
            summarizer,
            estimator,
            config,
            messages,
        })
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn token_count(&self) -> usize {
        self.estimator.estimate_all(&self.messages)
    }

    /// Current summary text, without the marker prefix.
    pub fn summary(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| is_summary_marker(m))
            .map(|m| &m.text[SUMMARY_PREFIX.len()..])
    }

    pub async fn add(&mut self, message: ChatMessage) -> Result<(), MemoryError> {
        self.messages.push(message);
        self.adapter.persist_new_turns(&self.messages).await?;
        self.ensure_capacity().await
    }

    pub async fn clear(&mut self) -> Result<(), MemoryError> {
        self.messages.clear();
        self.adapter.clear().await?;
        Ok(())
    }

    async fn ensure_capacity(&mut self) -> Result<(), MemoryError> {
        let current = self.token_count();
        if current <= self.config.max_tokens {
            return Ok(());
        }

        let marker_index = self.messages.iter().position(is_summary_marker);
        let start = marker_index.map_or(0, |i| i + 1);
        let old_marker = marker_index.map(|i| self.messages[i].clone());
        let keep_count = self.config.keep_count.max(MIN_KEEP_COUNT);
        let evictable_end = self.messages.len().saturating_sub(keep_count);

        // Working-set position i maps to active id (i - start). This assumes the
        // filtered working set and the store's active list line up one to one.
        let active_ids = self.adapter.active_message_ids().await?;

        let mut prefix: Vec<ChatMessage> = Vec::new();
        let mut ids_to_archive: Vec<Uuid> = Vec::new();

        for i in start..evictable_end {
            let candidate = &self.messages[i];
            if is_summary_marker(candidate) {
                continue;
            }
            prefix.push(candidate.clone());
            if let Some(id) = active_ids.get(i - start) {
                ids_to_archive.push(*id);
            }

            let remaining = old_marker
                .iter()
                .chain(self.messages[i + 1..].iter())
                .map(|m| self.estimator.estimate(m))
                .sum::<usize>()
                + self.config.summary_buffer;
            if remaining <= self.config.max_tokens {
                break;
            }
        }

        if prefix.is_empty() {
            debug!(
                "Window over budget ({} > {}) but nothing evictable",
                current, self.config.max_tokens
            );
            return Ok(());
        }

        let previous = self.summary().map(str::to_string);
        let new_summary = self.summarize(previous.as_deref(), &prefix).await;

        self.adapter.archive(&ids_to_archive, &new_summary).await?;

        let evicted_end = start + prefix.len();
        let mut rebuilt = Vec::with_capacity(self.messages.len() - evicted_end + 1);
        rebuilt.push(summary_marker(&new_summary));
        rebuilt.extend(
            self.messages[evicted_end..]
                .iter()
                .filter(|m| !is_summary_marker(m))
                .cloned(),
        );

        info!(
            "Evicted {} messages from {} ({} -> {} tokens)",
            prefix.len(),
            self.adapter.conversation_id(),
            current,
            self.estimator.estimate_all(&rebuilt)
        );
        self.messages = rebuilt;
        Ok(())
    }

    async fn summarize(&self, previous: Option<&str>, prefix: &[ChatMessage]) -> String {
        let prompt = build_summary_prompt(previous, prefix);
        match self.summarizer.summarize(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Summarizer returned empty text, keeping degraded summary");
                degraded_summary(previous)
            }
            Err(e) => {
                warn!("Summarization failed, keeping degraded summary: {}", e);
                degraded_summary(previous)
            }
        }
    }
}

fn degraded_summary(previous: Option<&str>) -> String {
    match previous {
        Some(previous) => format!("{}{}", previous, DEGRADED_WITH_PREVIOUS),
        None => DEGRADED_WITHOUT_PREVIOUS.to_string(),
    }
}

pub(crate) fn build_summary_prompt(previous: Option<&str>, prefix: &[ChatMessage]) -> String {
    let mut body = String::new();
    if let Some(previous) = previous {
        body.push_str("Previous summary:\n");
        body.push_str(previous);
        body.push_str("\n\nNew messages to incorporate:\n");
    }
    for message in prefix {
        body.push_str(message.role.transcript_label());
        body.push_str(": ");
        body.push_str(&message.text);
        body.push('\n');
    }
    format!("{}{}\nSummary:", SUMMARY_INSTRUCTIONS, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::services::llm_service::MockSummarizer;
    use crate::store::{ConversationStore, InMemoryConversationStore};

    struct FixedTokenEstimator(usize);

    impl TokenEstimator for FixedTokenEstimator {
        fn estimate(&self, _message: &ChatMessage) -> usize {
            self.0
        }
    }

    fn small_window() -> WindowConfig {
        WindowConfig {
            max_tokens: 100,
            keep_count: 2,
            summary_buffer: 10,
        }
    }

    async fn seeded(n: usize) -> (Arc<InMemoryConversationStore>, Vec<Uuid>) {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut ids = Vec::new();
        for i in 1..=n {
            let role = if i % 2 == 1 { Role::User } else { Role::Ai };
            let msg = store
                .add_message("alice", "c1", role, &format!("m{}", i))
                .await
                .unwrap();
            ids.push(msg.id);
        }
        (store, ids)
    }

    async fn window(
        store: Arc<InMemoryConversationStore>,
        summarizer: MockSummarizer,
    ) -> SummarizingWindow {
        SummarizingWindow::load(
            MemoryAdapter::new(store, "alice", "c1"),
            Arc::new(summarizer),
            Arc::new(FixedTokenEstimator(30)),
            small_window(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_prompt_tags_roles_and_carries_previous_summary() {
        let prompt = build_summary_prompt(
            Some("old facts"),
            &[ChatMessage::user("q"), ChatMessage::ai("a"), ChatMessage::system("s")],
        );
        assert!(prompt.contains(
            "Previous summary:\nold facts\n\nNew messages to incorporate:\nUser: q\nAssistant: a\nSystem: s\n"
        ));

        let fresh = build_summary_prompt(None, &[ChatMessage::user("q")]);
        assert!(!fresh.contains("Previous summary"));
        assert!(fresh.contains("User: q\n"));
    }

    #[tokio::test]
    async fn test_under_budget_does_not_summarize() {
        let (store, _) = seeded(2).await;
        let mut summarizer = MockSummarizer::new();
        summarizer.expect_summarize().never();

        let mut window = window(store.clone(), summarizer).await;
        window.add(ChatMessage::ai("m3")).await.unwrap();

        assert_eq!(window.messages().len(), 3);
        assert_eq!(window.token_count(), 90);
        assert_eq!(store.active_messages("alice", "c1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_eviction_is_minimal_and_spares_last_two() {
        let (store, ids) = seeded(5).await;
        let mut summarizer = MockSummarizer::new();
        summarizer
            .expect_summarize()
            .withf(|prompt: &str| {
                prompt.contains("User: m1\nAssistant: m2\nUser: m3\n") && !prompt.contains("m4")
            })
            .times(1)
            .returning(|_| Ok("first three".to_string()));

        let mut window = window(store.clone(), summarizer).await;
        window.add(ChatMessage::ai("m6")).await.unwrap();

        assert_eq!(
            window.messages(),
            vec![
                summary_marker("first three"),
                ChatMessage::ai("m4"),
                ChatMessage::user("m5"),
                ChatMessage::ai("m6"),
            ]
        );
        assert_eq!(window.summary(), Some("first three"));

        let history = store.full_history("alice", "c1").await.unwrap();
        let archived: Vec<Uuid> = history.iter().filter(|m| m.archived).map(|m| m.id).collect();
        assert_eq!(archived, ids[..3].to_vec());
        assert_eq!(history.len(), 6);
        assert_eq!(
            store.summary("alice", "c1").await.unwrap().as_deref(),
            Some("first three")
        );
    }

    #[tokio::test]
    async fn test_keep_count_can_block_eviction() {
        let (store, _) = seeded(1).await;
        let mut summarizer = MockSummarizer::new();
        summarizer.expect_summarize().never();

        let mut window = SummarizingWindow::load(
            MemoryAdapter::new(store, "alice", "c1"),
            Arc::new(summarizer),
            Arc::new(FixedTokenEstimator(80)),
            small_window(),
        )
        .await
        .unwrap();
        window.add(ChatMessage::ai("m2")).await.unwrap();

        assert_eq!(window.messages().len(), 2);
        assert_eq!(window.summary(), None);
    }

    #[tokio::test]
    async fn test_zero_keep_count_still_spares_latest_exchange() {
        let (store, _) = seeded(3).await;
        let mut summarizer = MockSummarizer::new();
        summarizer
            .expect_summarize()
            .times(1)
            .returning(|_| Ok("sum".to_string()));

        let mut window = SummarizingWindow::load(
            MemoryAdapter::new(store.clone(), "alice", "c1"),
            Arc::new(summarizer),
            Arc::new(FixedTokenEstimator(30)),
            WindowConfig {
                keep_count: 0,
                ..small_window()
            },
        )
        .await
        .unwrap();
        window.add(ChatMessage::user("latest question")).await.unwrap();

        let messages = window.messages();
        assert_eq!(messages.last(), Some(&ChatMessage::user("latest question")));
        assert_eq!(messages[messages.len() - 2], ChatMessage::user("m3"));

        let active: Vec<String> = store
            .active_messages("alice", "c1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert!(active.ends_with(&["m3".to_string(), "latest question".to_string()]));
    }

    #[tokio::test]
    async fn test_failed_summary_degrades_without_previous() {
        let (store, ids) = seeded(5).await;
        let mut summarizer = MockSummarizer::new();
        summarizer
            .expect_summarize()
            .returning(|_| Err(anyhow::anyhow!("model timed out")));

        let mut window = window(store.clone(), summarizer).await;
        window.add(ChatMessage::ai("m6")).await.unwrap();

        assert_eq!(window.summary(), Some("[Conversation history available]"));
        let history = store.full_history("alice", "c1").await.unwrap();
        assert!(history.iter().take(3).all(|m| m.archived));
        assert_eq!(history[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_blank_summary_degrades_with_previous() {
        let (store, ids) = seeded(6).await;
        store
            .archive_and_summarize("alice", "c1", &ids[..1], "earlier notes")
            .await
            .unwrap();

        let mut summarizer = MockSummarizer::new();
        summarizer
            .expect_summarize()
            .withf(|prompt: &str| prompt.contains("Previous summary:\nearlier notes\n"))
            .returning(|_| Ok("   ".to_string()));

        // marker + m2..m6, then m7 pushes it over budget
        let mut window = window(store.clone(), summarizer).await;
        window.add(ChatMessage::user("m7")).await.unwrap();

        assert_eq!(
            window.summary(),
            Some("earlier notes [Additional context available]")
        );
        assert!(is_summary_marker(&window.messages()[0]));
        assert_eq!(window.messages().iter().filter(|m| is_summary_marker(m)).count(), 1);
        assert_eq!(window.messages().last(), Some(&ChatMessage::user("m7")));
    }

    #[tokio::test]
    async fn test_clear_empties_window_and_store() {
        let (store, _) = seeded(3).await;
        let mut summarizer = MockSummarizer::new();
        summarizer.expect_summarize().never();

        let mut window = window(store.clone(), summarizer).await;
        window.clear().await.unwrap();

        assert!(window.messages().is_empty());
        assert!(store.full_history("alice", "c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let (store, _) = seeded(1).await;
        let result = SummarizingWindow::load(
            MemoryAdapter::new(store, "mallory", "c1"),
            Arc::new(MockSummarizer::new()),
            Arc::new(FixedTokenEstimator(1)),
            WindowConfig::default(),
        )
        .await;
        assert!(matches!(
            result,
            Err(MemoryError::Store(crate::utils::error::StoreError::Forbidden(_)))
        ));
    }
}
