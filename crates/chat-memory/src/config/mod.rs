pub mod settings;

pub use settings::{
    CacheBackend, DatabaseConfig, DocumentConfig, LlmConfig, LoggingConfig, MemoryConfig,
    PromptsConfig, Settings, StoreBackend, StoreConfig,
};
