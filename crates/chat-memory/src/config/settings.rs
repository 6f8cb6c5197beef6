use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::services::conversation::MIN_KEEP_COUNT;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    pub memory: MemoryConfig,
    pub documents: DocumentConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    JsonFile,
    Postgres,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub json_path: PathBuf,
    pub ownership_ttl_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            json_path: PathBuf::from("data/conversations.json"),
            ownership_ttl_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/chat_memory".to_string(),
            pool_max_size: 10,
            pool_timeout_seconds: 30,
        }
    }
}

/// Summarizing window policy.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_tokens: usize,
    pub keep_count: usize,
    pub summary_buffer: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            keep_count: 2,
            summary_buffer: 200,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DocumentConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub max_context_chars: usize,
    pub fetch_timeout_seconds: u64,
    pub max_fetch_bytes: usize,
    pub cache_backend: CacheBackend,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 200,
            top_k: 4,
            max_context_chars: 5000,
            fetch_timeout_seconds: 20,
            max_fetch_bytes: 20 * 1024 * 1024,
            cache_backend: CacheBackend::Memory,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            model: "default".to_string(),
            api_key: None,
            timeout_seconds: 120,
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive; `RUST_LOG` wins when set.
    pub filter: String,
    pub json: bool,
    /// When set, logs also go to a daily-rolling file in this directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,chat_memory=debug".to_string(),
            json: true,
            directory: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptsConfig {
    pub system_prompt: String,
    pub grounding_prefix: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant. Answer using the conversation so far \
                            and any document excerpts provided."
                .to_string(),
            grounding_prefix: "Relevant excerpts from the linked document:\n\n".to_string(),
        }
    }
}

impl Settings {
    /// Load `.env`, then `config/settings.toml` (optional), then `APP__*` env vars.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from("config/settings")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().to_string();

        let config = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.documents.chunk_overlap >= self.documents.chunk_size {
            anyhow::bail!(
                "documents.chunk_overlap ({}) must be smaller than documents.chunk_size ({})",
                self.documents.chunk_overlap,
                self.documents.chunk_size
            );
        }
        if self.memory.keep_count < MIN_KEEP_COUNT {
            anyhow::bail!(
                "memory.keep_count ({}) must be at least {} so the latest exchange is kept",
                self.memory.keep_count,
                MIN_KEEP_COUNT
            );
        }
        if self.memory.max_tokens == 0 {
            anyhow::bail!("memory.max_tokens must be greater than zero");
        }
        Ok(())
    }
}
