//! Conversation memory for chat assistants.
//!
//! Ownership-scoped persistence of conversations, a token-bounded working set
//! that folds old turns into a running summary, and best-effort grounding on
//! documents linked from a message.

pub mod config;
pub mod document;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;

pub use config::Settings;
pub use models::{Attachment, AttachmentKind, ChatMessage, Conversation, Message, Role};
pub use services::{ChatTurnService, MemoryAdapter, SummarizingWindow, TurnOutcome, WindowConfig};
pub use state::AppState;
pub use store::ConversationStore;
pub use utils::error::{DocumentError, MemoryError, StoreError};
