//! Conversation memory: the per-turn working set and its token-bounded,
//! summarizing window over the conversation store.

mod memory_adapter;
mod window;

pub use memory_adapter::{
    is_noise, is_summary_marker, summary_marker, MemoryAdapter, SUMMARY_PREFIX,
    TOOL_RESULT_PLACEHOLDER,
};
pub use window::{SummarizingWindow, WindowConfig, MIN_KEEP_COUNT};
