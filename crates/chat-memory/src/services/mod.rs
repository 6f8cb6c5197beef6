pub mod chat_turn;
pub mod conversation;
pub mod llm_service;

pub use chat_turn::{attachment_for, ChatTurnService, TurnOutcome};
pub use conversation::{MemoryAdapter, SummarizingWindow, WindowConfig};
pub use llm_service::{ChatModel, HttpLlmClient, Summarizer};
