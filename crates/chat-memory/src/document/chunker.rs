use tracing::debug;

/// Characters a chunk boundary may snap back to.
const SNAP_CHARS: [char; 5] = ['.', '!', '?', ';', '\n'];

/// Slice of the source text. Positions are char offsets, `end_pos` exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub start_pos: usize,
    pub end_pos: usize,
}

pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    /// Split into overlapping chunks. Each chunk is an exact substring of
    /// `text`; the next chunk starts `overlap` chars before the previous end.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total_len = chars.len();
        let mut chunks = Vec::new();

        let mut start = 0;
        while start < total_len {
            let end = self.cut_point(&chars, start);

            let content: String = chars[start..end].iter().collect();
            if !content.trim().is_empty() {
                chunks.push(Chunk {
                    content,
                    start_pos: start,
                    end_pos: end,
                });
            }

            if end >= total_len {
                break;
            }

            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }

        debug!("Split {} chars into {} chunks", total_len, chunks.len());
        chunks
    }

    /// Ideal cut, moved back to just after the nearest snap char when one lies
    /// within half a chunk of it.
    fn cut_point(&self, chars: &[char], start: usize) -> usize {
        let ideal = (start + self.chunk_size).min(chars.len());
        if ideal == chars.len() {
            return ideal;
        }

        let floor = ideal.saturating_sub(self.chunk_size / 2).max(start + 1);
        (floor..ideal)
            .rev()
            .find(|&i| SNAP_CHARS.contains(&chars[i]))
            .map(|i| i + 1)
            .unwrap_or(ideal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[Chunk]) -> String {
        let mut out: Vec<char> = Vec::new();
        let mut covered = 0;
        for chunk in chunks {
            let skip = covered - chunk.start_pos;
            out.extend(chunk.content.chars().skip(skip));
            covered = chunk.end_pos;
        }
        out.into_iter().collect()
    }

    #[test]
    fn test_unpunctuated_text_round_trips() {
        let text: String = (0..3000).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        let chunks = TextChunker::new(1200, 200).chunk(&text);

        let spans: Vec<_> = chunks.iter().map(|c| (c.start_pos, c.end_pos)).collect();
        assert_eq!(spans, vec![(0, 1200), (1000, 2200), (2000, 3000)]);
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn test_snaps_back_to_sentence_end() {
        let mut text = "x".repeat(900);
        text.push('.');
        text.push_str(&"y".repeat(1000));

        let chunks = TextChunker::new(1200, 200).chunk(&text);
        assert_eq!(chunks[0].end_pos, 901);
        assert!(chunks[0].content.ends_with('.'));
        assert_eq!(chunks[1].start_pos, 701);
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn test_ignores_punctuation_too_far_back() {
        let mut text = "x".repeat(100);
        text.push('.');
        text.push_str(&"y".repeat(2000));

        let chunks = TextChunker::new(1200, 200).chunk(&text);
        assert_eq!(chunks[0].end_pos, 1200);
    }

    #[test]
    fn test_multibyte_text_is_split_on_chars() {
        let text = "é".repeat(2500);
        let chunks = TextChunker::new(1000, 100).chunk(&text);
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 1000));
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn test_empty_and_blank_input() {
        let chunker = TextChunker::new(1200, 200);
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\n   ").is_empty());
    }

    #[test]
    fn test_oversized_overlap_still_advances() {
        let chunks = TextChunker::new(10, 50).chunk(&"z".repeat(35));
        assert!(chunks.windows(2).all(|w| w[1].start_pos > w[0].start_pos));
        assert_eq!(chunks.last().map(|c| c.end_pos), Some(35));
    }
}
