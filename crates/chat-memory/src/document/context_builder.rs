use std::sync::Arc;
use tracing::{debug, info, warn};

use super::artifact_cache::ArtifactCache;
use super::canonical::{cache_key, canonicalize};
use super::chunker::TextChunker;
use super::fetcher::DocumentFetcher;
use super::parser::TextExtractor;
use super::retriever::LexicalRetriever;
use crate::config::DocumentConfig;
use crate::utils::error::DocumentError;

/// Best-effort grounding text for a question about a linked document.
pub struct DocumentContextBuilder {
    fetcher: Arc<dyn DocumentFetcher>,
    extractor: Arc<dyn TextExtractor>,
    cache: Arc<dyn ArtifactCache>,
    chunker: TextChunker,
    retriever: LexicalRetriever,
    top_k: usize,
    max_context_chars: usize,
}

impl DocumentContextBuilder {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        extractor: Arc<dyn TextExtractor>,
        cache: Arc<dyn ArtifactCache>,
        config: &DocumentConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            cache,
            chunker: TextChunker::new(config.chunk_size, config.chunk_overlap),
            retriever: LexicalRetriever::new(),
            top_k: config.top_k,
            max_context_chars: config.max_context_chars,
        }
    }

    /// Numbered excerpts of `source_url` most relevant to `question`, or
    /// `None` if anything along the way fails or nothing is left.
    pub async fn build_context(&self, source_url: &str, question: &str) -> Option<String> {
        let chunks = match self.load_chunks(source_url).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Document grounding skipped for {}: {}", source_url, e);
                return None;
            }
        };

        let selected = self.retriever.retrieve(question, &chunks, self.top_k);
        if selected.is_empty() {
            debug!("No chunks to ground on for {}", source_url);
            return None;
        }

        let context = assemble_context(&selected, self.max_context_chars);
        if context.is_empty() {
            return None;
        }
        debug!(
            "Built {} chars of context from {} chunks of {}",
            context.chars().count(),
            selected.len(),
            source_url
        );
        Some(context)
    }

    async fn load_chunks(&self, source_url: &str) -> Result<Vec<String>, DocumentError> {
        let key = cache_key(source_url);

        match self.cache.get(&key).await {
            Ok(Some(chunks)) => {
                debug!("Artifact cache hit for {}", canonicalize(source_url));
                return Ok(chunks);
            }
            Ok(None) => {}
            Err(e) => warn!("Artifact cache read failed, treating as miss: {}", e),
        }

        let fetched = self.fetcher.fetch(source_url).await?;

        let extractor = self.extractor.clone();
        let url = source_url.to_string();
        let text = tokio::task::spawn_blocking(move || {
            extractor.extract_text(&fetched.bytes, fetched.content_type.as_deref(), &url)
        })
        .await
        .map_err(|e| DocumentError::Extraction(format!("extraction task failed: {}", e)))??;

        let chunks: Vec<String> = self
            .chunker
            .chunk(&text)
            .into_iter()
            .map(|c| c.content)
            .collect();

        if !chunks.is_empty() {
            match self.cache.put(&key, &canonicalize(source_url), &chunks).await {
                Ok(()) => info!("Cached {} chunks for {}", chunks.len(), canonicalize(source_url)),
                Err(e) => warn!("Artifact cache write failed: {}", e),
            }
        }

        Ok(chunks)
    }
}

/// `[k] chunk\n\n` per chunk, cut exactly at `budget` chars.
pub fn assemble_context(chunks: &[String], budget: usize) -> String {
    let mut out = String::new();
    let mut used = 0;

    for (i, chunk) in chunks.iter().enumerate() {
        let entry = format!("[{}] {}\n\n", i + 1, chunk);
        let len = entry.chars().count();
        let remaining = budget - used;

        if len <= remaining {
            out.push_str(&entry);
            used += len;
        } else {
            out.extend(entry.chars().take(remaining));
            break;
        }
    }

    out
}
