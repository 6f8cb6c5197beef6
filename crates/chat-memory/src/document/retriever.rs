use std::collections::HashMap;

/// Added when the whole normalized query appears inside the chunk.
const PHRASE_BONUS: usize = 5;

/// Term-frequency ranking over normalized text. No index, no IDF.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalRetriever;

impl LexicalRetriever {
    pub fn new() -> Self {
        Self
    }

    /// Top `limit` chunks by descending score, ties in original order.
    /// When nothing matches this is simply the first `limit` chunks.
    pub fn retrieve(&self, query: &str, chunks: &[String], limit: usize) -> Vec<String> {
        if chunks.is_empty() || limit == 0 {
            return Vec::new();
        }

        let query = normalize(query);
        let terms: Vec<&str> = query.split(' ').filter(|t| !t.is_empty()).collect();

        let mut scored: Vec<(usize, usize)> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (i, score(&query, &terms, &normalize(chunk))))
            .collect();

        // stable, so equal scores keep input order
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        scored
            .into_iter()
            .take(limit)
            .map(|(i, _)| chunks[i].clone())
            .collect()
    }
}

fn score(query: &str, terms: &[&str], chunk: &str) -> usize {
    let mut frequency: HashMap<&str, usize> = HashMap::new();
    for token in chunk.split(' ').filter(|t| !t.is_empty()) {
        *frequency.entry(token).or_default() += 1;
    }

    let term_hits: usize = terms
        .iter()
        .map(|t| frequency.get(t).copied().unwrap_or(0))
        .sum();

    let phrase = if !query.is_empty() && chunk.contains(query) {
        PHRASE_BONUS
    } else {
        0
    };

    term_hits + phrase
}

/// Lowercase, non-alphanumerics to spaces, whitespace collapsed.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hello,   WORLD!\n(v2.0) "), "hello world v2 0");
        assert_eq!(normalize("--"), "");
    }

    #[test]
    fn test_ranks_by_term_frequency() {
        let input = chunks(&[
            "nothing relevant here",
            "rust rust rust",
            "a little rust",
        ]);
        let out = LexicalRetriever::new().retrieve("Rust?", &input, 2);
        assert_eq!(out, chunks(&["rust rust rust", "a little rust"]));
    }

    #[test]
    fn test_phrase_bonus_beats_scattered_terms() {
        let input = chunks(&[
            "invalidation invalidation invalidation cache cache",
            "we discuss cache invalidation once",
        ]);
        // first: 2 + 3 = 5 term hits, no phrase; second: 1 + 1 + 5 bonus = 7
        let out = LexicalRetriever::new().retrieve("cache invalidation", &input, 1);
        assert_eq!(out, chunks(&["we discuss cache invalidation once"]));
    }

    #[test]
    fn test_no_match_falls_back_to_input_order() {
        let input = chunks(&["alpha", "beta", "gamma"]);
        let out = LexicalRetriever::new().retrieve("zzz-no-match", &input, 2);
        assert_eq!(out, chunks(&["alpha", "beta"]));
    }

    #[test]
    fn test_ties_keep_original_order() {
        let input = chunks(&["x one", "y one", "z one"]);
        let out = LexicalRetriever::new().retrieve("one", &input, 3);
        assert_eq!(out, input);
    }

    #[test]
    fn test_empty_inputs() {
        let retriever = LexicalRetriever::new();
        assert!(retriever.retrieve("q", &[], 3).is_empty());
        assert!(retriever.retrieve("q", &chunks(&["a"]), 0).is_empty());
        assert_eq!(retriever.retrieve("", &chunks(&["a", "b"]), 5), chunks(&["a", "b"]));
    }
}
