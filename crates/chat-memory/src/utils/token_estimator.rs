use unicode_segmentation::UnicodeSegmentation;

use crate::models::ChatMessage;

/// Deterministic token counter used for the context budget.
///
/// Implementations must return the same value for the same message every time,
/// otherwise the window can flip between "over" and "under" budget on re-load.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, message: &ChatMessage) -> usize;

    fn estimate_all(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| self.estimate(m)).sum()
    }
}

/// Grapheme based estimate: avg ~4 graphemes per token plus a fixed
/// per-message overhead for role/formatting tokens.
#[derive(Debug, Clone)]
pub struct GraphemeTokenEstimator {
    chars_per_token: usize,
    message_overhead: usize,
}

impl GraphemeTokenEstimator {
    pub fn new(chars_per_token: usize, message_overhead: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
            message_overhead,
        }
    }

    pub fn count_text(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let char_count = text.graphemes(true).count();
        char_count.div_ceil(self.chars_per_token).max(1)
    }
}

impl Default for GraphemeTokenEstimator {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

impl TokenEstimator for GraphemeTokenEstimator {
    fn estimate(&self, message: &ChatMessage) -> usize {
        self.count_text(&message.text) + self.message_overhead
    }
}

/// Word based heuristic for Indonesian/English mixed content.
/// Rule: avg ~1.3 tokens per word, plus small overhead for formatting.
#[derive(Debug, Clone, Default)]
pub struct WordTokenEstimator;

impl WordTokenEstimator {
    pub fn count_text(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let words = text.split_whitespace().count();
        ((words as f64 * 1.3) + 5.0).ceil() as usize
    }
}

impl TokenEstimator for WordTokenEstimator {
    fn estimate(&self, message: &ChatMessage) -> usize {
        Self::count_text(&message.text)
    }
}
