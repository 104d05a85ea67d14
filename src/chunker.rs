//! Splits extracted document text into overlapping fixed-size windows.
//!
//! Sizes and offsets count characters, not bytes, so a window never ends in
//! the middle of a multi-byte character.

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_MIN_CHUNK_CHARS};
use crate::error::{RagError, Result};

/// A slice of a source document. Its position in a user's chunk list is the
/// row id of its vector in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source: String,
}

/// Window parameters. `overlap < size` is checked on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    size: usize,
    overlap: usize,
    min_chars: usize,
}

impl ChunkParams {
    pub fn new(size: usize, overlap: usize, min_chars: usize) -> Result<Self> {
        if size == 0 {
            return Err(RagError::InvalidConfig("chunk_size must be at least 1".into()));
        }
        if overlap >= size {
            return Err(RagError::InvalidConfig(format!(
                "chunk_overlap ({overlap}) must be smaller than chunk_size ({size})"
            )));
        }
        Ok(Self {
            size,
            overlap,
            min_chars,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn stride(&self) -> usize {
        self.size - self.overlap
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            min_chars: DEFAULT_MIN_CHUNK_CHARS,
        }
    }
}

/// Chunk one document. Windows of `min_chars` characters or fewer are dropped.
pub fn chunk_document(text: &str, source: &str, params: &ChunkParams) -> Vec<Chunk> {
    let normalized = normalize_whitespace(text);
    let chars: Vec<char> = normalized.chars().collect();

    if chars.len() <= params.size {
        if chars.len() > params.min_chars {
            return vec![Chunk {
                text: normalized,
                source: source.to_string(),
            }];
        }
        return Vec::new();
    }

    (0..chars.len())
        .step_by(params.stride())
        .map(|start| {
            let end = (start + params.size).min(chars.len());
            &chars[start..end]
        })
        .filter(|window| window.len() > params.min_chars)
        .map(|window| Chunk {
            text: window.iter().collect(),
            source: source.to_string(),
        })
        .collect()
}

/// Collapse every whitespace run into a single space and trim both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letters(len: usize) -> String {
        (0..len)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\t b   c  "), "a b c");
        assert_eq!(normalize_whitespace("\n\n"), "");
    }

    #[test]
    fn test_short_text_single_chunk() {
        let params = ChunkParams::default();
        let chunks = chunk_document("The patient reported a mild fever.", "notes.txt", &params);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "The patient reported a mild fever.");
        assert_eq!(chunks[0].source, "notes.txt");
    }

    #[test]
    fn test_tiny_text_dropped() {
        let params = ChunkParams::default();
        assert!(chunk_document("too short", "a.txt", &params).is_empty());
        // exactly 20 characters is not "meaningful"
        assert!(chunk_document(&letters(20), "a.txt", &params).is_empty());
        assert_eq!(chunk_document(&letters(21), "a.txt", &params).len(), 1);
        assert!(chunk_document("   \n ", "a.txt", &params).is_empty());
    }

    #[test]
    fn test_windows_for_1200_chars() {
        let params = ChunkParams::new(500, 100, 20).unwrap();
        let text = letters(1200);
        let chunks = chunk_document(&text, "report.txt", &params);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, text[0..500]);
        assert_eq!(chunks[1].text, text[400..900]);
        assert_eq!(chunks[2].text, text[800..1200]);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 500));
        assert!(chunks.iter().all(|c| c.source == "report.txt"));
    }

    #[test]
    fn test_short_tail_window_dropped() {
        let params = ChunkParams::new(100, 10, 20).unwrap();
        // offsets 0, 90, 180; the window at 180 holds 15 characters
        let chunks = chunk_document(&letters(195), "a.txt", &params);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let params = ChunkParams::new(64, 16, 20).unwrap();
        let text = "Blood pressure readings over the week.\n\n  ".repeat(20);
        assert_eq!(
            chunk_document(&text, "bp.txt", &params),
            chunk_document(&text, "bp.txt", &params)
        );
    }

    #[test]
    fn test_multibyte_text_splits_on_chars() {
        let params = ChunkParams::new(30, 5, 20).unwrap();
        let text = "é".repeat(70);
        let chunks = chunk_document(&text, "fr.txt", &params);
        // offsets 0, 25, 50; the last window has exactly 20 chars and is dropped
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text.chars().count(), 30);
    }

    #[test]
    fn test_invalid_params() {
        assert!(ChunkParams::new(0, 0, 20).is_err());
        assert!(ChunkParams::new(100, 100, 20).is_err());
        assert!(ChunkParams::new(100, 150, 20).is_err());
        assert_eq!(ChunkParams::new(500, 100, 20).unwrap().stride(), 400);
    }
}
