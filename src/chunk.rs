//! Fixed-window text chunker.
//!
//! Splits document content into overlapping windows of `window_size`
//! characters, advancing by `window_size - overlap` each step. Offsets are
//! counted in Unicode scalar values, never bytes, so multi-byte text is
//! never split mid-character.
//!
//! Chunking is deterministic: the same content and parameters always
//! produce the same spans, which lets re-ingestion fully replace a
//! document's chunks without diffing.

use crate::config::ChunkingConfig;

/// A window of document content prior to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    /// Character offset of the window start.
    pub start: usize,
    /// Window length in characters.
    pub len: usize,
    pub text: String,
}

/// Split `content` into overlapping windows.
///
/// Returns an empty vector for empty content. Content shorter than the
/// window yields exactly one chunk, and the loop stops as soon as a window
/// reaches the end, so no empty trailing chunk is ever produced.
pub fn chunk_text(content: &str, params: &ChunkingConfig) -> Vec<TextChunk> {
    let window = params.window_size.max(1);
    let stride = window.saturating_sub(params.overlap).max(1);

    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = content
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(content.len()))
        .collect();
    let total = boundaries.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < total {
        let end = (start + window).min(total);
        chunks.push(TextChunk {
            index: chunks.len(),
            start,
            len: end - start,
            text: content[boundaries[start]..boundaries[end]].to_string(),
        });
        if end == total {
            break;
        }
        start += stride;
    }
    chunks
}

/// Rebuild the original content from chunk spans.
///
/// Each chunk contributes only the characters past the end of what has
/// already been emitted.
pub fn reconstruct(chunks: &[TextChunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        let end = chunk.start + chunk.len;
        if end <= covered {
            continue;
        }
        let skip = covered.saturating_sub(chunk.start);
        out.extend(chunk.text.chars().skip(skip));
        covered = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(window_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            window_size,
            overlap,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", &params(500, 50));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", &params(500, 50)).is_empty());
    }

    #[test]
    fn test_windows_overlap_by_configured_amount() {
        let text: String = ('a'..='z').cycle().take(1200).collect();
        let chunks = chunk_text(&text, &params(500, 50));
        let starts: Vec<usize> = chunks.iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![0, 450, 900]);
        assert_eq!(chunks[0].len, 500);
        assert_eq!(chunks[1].len, 500);
        assert_eq!(chunks[2].len, 300);
    }

    #[test]
    fn test_no_dangling_chunk_when_length_aligns() {
        // 950 = 500 + 450: second window ends exactly at the end.
        let text = "x".repeat(950);
        let chunks = chunk_text(&text, &params(500, 50));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].start + chunks[1].len, 950);
        assert!(chunks.iter().all(|c| c.len > 0));
    }

    #[test]
    fn test_exact_window_length_single_chunk() {
        let text = "y".repeat(500);
        assert_eq!(chunk_text(&text, &params(500, 50)).len(), 1);
    }

    #[test]
    fn test_coverage_reconstructs_content() {
        let text = (0..200)
            .map(|i| format!("Sentence number {i} about the quarterly budget."))
            .collect::<Vec<_>>()
            .join(" ");
        for (w, o) in [(500, 50), (64, 0), (7, 6), (1, 0)] {
            let chunks = chunk_text(&text, &params(w, o));
            assert_eq!(reconstruct(&chunks), text, "window={w} overlap={o}");
        }
    }

    #[test]
    fn test_multibyte_characters_counted_as_chars() {
        let text = "héllo wörld ✓ ".repeat(60);
        let chunks = chunk_text(&text, &params(100, 10));
        assert!(chunks.iter().all(|c| c.text.chars().count() == c.len));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_indices_contiguous() {
        let text = "z".repeat(5_000);
        let chunks = chunk_text(&text, &params(300, 30));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta. ".repeat(100);
        let c1 = chunk_text(&text, &params(120, 20));
        let c2 = chunk_text(&text, &params(120, 20));
        assert_eq!(c1, c2);
    }
}
