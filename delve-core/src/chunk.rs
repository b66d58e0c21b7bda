//! Separator-priority recursive text splitting.
//!
//! Text is split on the highest-priority separator it contains. Pieces that
//! are still too long are split again with the remaining separators, and short
//! neighbours are merged back up to `chunk_size` with `overlap` characters of
//! trailing context carried into the next chunk. Lengths are in characters.

use serde::{Deserialize, Serialize};

/// Paragraphs, then block markup, then lines, words, and characters.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "<h1>", "<h2>", "<h3>", "<p>", "<li>", "\n", " ", ""];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecursiveSplitter {
    pub chunk_size: usize,
    pub overlap: usize,
    pub separators: Vec<String>,
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self::new(1000, 100)
    }
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    /// Split `text` into trimmed, non-empty chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = "";
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() || text.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut short: Vec<String> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                short.push(piece);
                continue;
            }
            if !short.is_empty() {
                chunks.extend(self.merge(&short));
                short.clear();
            }
            if remaining.is_empty() {
                if let Some(piece) = trimmed(&piece) {
                    chunks.push(piece);
                }
            } else {
                chunks.extend(self.split_with(&piece, remaining));
            }
        }
        if !short.is_empty() {
            chunks.extend(self.merge(&short));
        }
        chunks
    }

    /// Greedily join pieces up to `chunk_size`, keeping up to `overlap`
    /// characters of the previous chunk at the start of the next.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: std::collections::VecDeque<&str> = std::collections::VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                if let Some(chunk) = trimmed(&window.iter().copied().collect::<String>()) {
                    chunks.push(chunk);
                }
                while total > self.overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }

        if let Some(chunk) = trimmed(&window.iter().copied().collect::<String>()) {
            chunks.push(chunk);
        }
        chunks
    }
}

/// Split on `separator`, attaching each separator to the piece that follows
/// it. An empty separator splits into characters.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut parts = text.split(separator);
    let mut pieces = Vec::new();
    if let Some(first) = parts.next()
        && !first.is_empty()
    {
        pieces.push(first.to_string());
    }
    for part in parts {
        pieces.push(format!("{separator}{part}"));
    }
    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn trimmed(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_text_single_chunk() {
        let splitter = RecursiveSplitter::new(100, 10);
        assert_eq!(splitter.split("  hello world  "), vec!["hello world"]);
    }

    #[test]
    fn test_empty_text() {
        assert!(RecursiveSplitter::default().split("").is_empty());
        assert!(RecursiveSplitter::default().split(" \n\n \n").is_empty());
    }

    #[test]
    fn test_paragraphs_merged_up_to_size() {
        let splitter = RecursiveSplitter::new(30, 0);
        let text = "aaaa aaaa\n\nbbbb bbbb\n\ncccc cccc\n\ndddd dddd";
        let chunks = splitter.split(text);
        assert_eq!(chunks, vec!["aaaa aaaa\n\nbbbb bbbb", "cccc cccc\n\ndddd dddd"]);
    }

    #[test]
    fn test_overlap_carries_context() {
        let splitter = RecursiveSplitter::new(20, 10);
        let chunks = splitter.split("one two three four five six seven eight");
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(
                pair[1].contains(last_word),
                "{:?} should overlap with {:?}",
                pair[1],
                pair[0]
            );
        }
    }

    #[test]
    fn test_markup_separator_used_before_lines() {
        let splitter = RecursiveSplitter::new(25, 0);
        let chunks = splitter.split("<h1>Title here</h1><p>First paragraph</p><p>Second one</p>");
        assert!(chunks.iter().all(|c| c.starts_with('<')));
        assert!(chunks.iter().any(|c| c.starts_with("<p>")));
    }

    #[test]
    fn test_long_word_split_by_characters() {
        let splitter = RecursiveSplitter::new(4, 0);
        let chunks = splitter.split("abcdefghij");
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_multibyte_lengths_in_chars() {
        let splitter = RecursiveSplitter::new(3, 0);
        let chunks = splitter.split("äöüßé");
        assert_eq!(chunks, vec!["äöü", "ßé"]);
    }

    #[test]
    fn test_overlap_clamped_below_size() {
        let splitter = RecursiveSplitter::new(10, 50);
        assert_eq!(splitter.overlap, 9);
    }

    proptest! {
        #[test]
        fn chunks_never_exceed_size(
            text in "[a-z <>/\n]{0,400}",
            size in 5usize..60,
            overlap in 0usize..20,
        ) {
            let splitter = RecursiveSplitter::new(size, overlap);
            for chunk in splitter.split(&text) {
                prop_assert!(!chunk.is_empty());
                prop_assert!(chunk.chars().count() <= size);
                prop_assert_eq!(chunk.trim(), chunk.as_str());
            }
        }

        #[test]
        fn every_word_survives(words in proptest::collection::vec("[a-z]{1,8}", 0..40)) {
            let text = words.join(" ");
            let chunks = RecursiveSplitter::new(20, 5).split(&text);
            let joined = chunks.join(" ");
            for word in &words {
                prop_assert!(joined.contains(word.as_str()));
            }
        }
    }
}
