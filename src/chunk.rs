//! Fixed-window text chunker with overlap.
//!
//! Splits document text into [`TextChunk`]s of at most `chunk_size`
//! characters. Window *i* starts at character offset `i * (chunk_size - overlap)`,
//! so consecutive windows share exactly `overlap` characters and the final
//! window may be shorter.
//!
//! Offsets count `char`s, not bytes, so a window never splits a UTF-8
//! sequence. The document is trimmed once before windowing; every chunk is
//! an exact slice of that trimmed text, which means dropping the first
//! `overlap` characters of every chunk after the first and concatenating
//! gives back the trimmed text.
//!
//! # Example
//!
//! ```rust
//! use knowledge_rag::chunk::chunk_text;
//!
//! let text = "a".repeat(1200);
//! let chunks = chunk_text(&text, 500, 100).unwrap();
//! let starts: Vec<usize> = chunks.iter().map(|c| c.start).collect();
//! assert_eq!(starts, vec![0, 400, 800]);
//! ```

use crate::error::ChunkingError;

/// A window of document text, before it is tied to a document's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position of this chunk within its document, starting at 0.
    pub index: usize,
    /// Character offset of the chunk within the trimmed document text.
    pub start: usize,
    pub text: String,
}

impl TextChunk {
    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Reject parameter pairs that could never advance the window.
pub fn validate_params(chunk_size: usize, overlap: usize) -> Result<(), ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::ZeroChunkSize);
    }
    if overlap >= chunk_size {
        return Err(ChunkingError::OverlapTooLarge {
            chunk_size,
            overlap,
        });
    }
    Ok(())
}

/// Split `text` into overlapping windows.
///
/// Returns an empty vector for empty or whitespace-only text, and a
/// single chunk equal to the trimmed text when it is shorter than
/// `chunk_size`.
///
/// # Errors
///
/// [`ChunkingError`] when `chunk_size == 0` or `overlap >= chunk_size`.
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<TextChunk>, ChunkingError> {
    validate_params(chunk_size, overlap)?;

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char, plus the end, so windows slice in O(1).
    let mut boundaries: Vec<usize> = trimmed.char_indices().map(|(i, _)| i).collect();
    boundaries.push(trimmed.len());
    let total_chars = boundaries.len() - 1;

    let step = chunk_size - overlap;
    let mut chunks = Vec::with_capacity(total_chars / step + 1);
    let mut start = 0usize;

    loop {
        let end = (start + chunk_size).min(total_chars);
        chunks.push(TextChunk {
            index: chunks.len(),
            start,
            text: trimmed[boundaries[start]..boundaries[end]].to_string(),
        });
        if end == total_chars {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(chunks: &[TextChunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&c.text);
            } else {
                out.extend(c.text.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_offsets_for_1200_chars() {
        let text = "x".repeat(1200);
        let chunks = chunk_text(&text, 500, 100).unwrap();
        let starts: Vec<usize> = chunks.iter().map(|c| c.start).collect();
        let lens: Vec<usize> = chunks.iter().map(|c| c.char_len()).collect();
        assert_eq!(starts, vec![0, 400, 800]);
        assert_eq!(lens, vec![500, 500, 400]);
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 500, 100).unwrap().is_empty());
        assert!(chunk_text("  \n\t ", 500, 100).unwrap().is_empty());
    }

    #[test]
    fn test_short_text_single_trimmed_chunk() {
        let chunks = chunk_text("  Hello, world!\n", 500, 100).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_exact_chunk_size_single_chunk() {
        let text = "y".repeat(500);
        let chunks = chunk_text(&text, 500, 100).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_rejects_overlap_not_smaller() {
        assert_eq!(
            chunk_text("abc", 10, 10),
            Err(ChunkingError::OverlapTooLarge {
                chunk_size: 10,
                overlap: 10
            })
        );
        assert!(chunk_text("abc", 10, 11).is_err());
        assert_eq!(chunk_text("abc", 0, 0), Err(ChunkingError::ZeroChunkSize));
    }

    #[test]
    fn test_reconstructs_text() {
        let text = (0..300)
            .map(|i| format!("word{} ", i))
            .collect::<String>();
        for (size, overlap) in [(50, 0), (50, 10), (64, 63), (7, 3), (1000, 999)] {
            let chunks = chunk_text(&text, size, overlap).unwrap();
            assert_eq!(
                reconstruct(&chunks, overlap),
                text.trim(),
                "size={size} overlap={overlap}"
            );
            for c in &chunks {
                assert!(c.char_len() <= size);
            }
        }
    }

    #[test]
    fn test_consecutive_chunks_share_overlap() {
        let text: String = ('a'..='z').cycle().take(230).collect();
        let chunks = chunk_text(&text, 40, 15).unwrap();
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().skip(40 - 15).collect();
            let head: String = pair[1].text.chars().take(15).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_multibyte_chars() {
        let text = "┌──────────────────┐ héllo wörld ✓ 日本語テキスト";
        let chunks = chunk_text(text, 8, 3).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks, 3), text);
    }

    #[test]
    fn test_no_trailing_chunk_inside_overlap() {
        // 900 chars: windows [0,500) and [400,900) already cover everything.
        let text = "z".repeat(900);
        let chunks = chunk_text(&text, 500, 100).unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let c1 = chunk_text(text, 12, 4).unwrap();
        let c2 = chunk_text(text, 12, 4).unwrap();
        assert_eq!(c1, c2);
    }
}
