//! Document grounding: fetch a linked file, extract its text, chunk it, cache
//! the chunks by canonical URL, and pick the excerpts relevant to a question.

pub mod artifact_cache;
pub mod canonical;
pub mod chunker;
pub mod context_builder;
pub mod fetcher;
pub mod parser;
pub mod retriever;

pub use artifact_cache::{ArtifactCache, InMemoryArtifactCache, PgArtifactCache};
pub use canonical::{cache_key, canonicalize, extract_first_url};
pub use chunker::{Chunk, TextChunker};
pub use context_builder::{assemble_context, DocumentContextBuilder};
pub use fetcher::{DocumentFetcher, FetchedDocument, HttpFetcher};
pub use parser::{DocumentKind, DocumentParser, TextExtractor};
pub use retriever::LexicalRetriever;
