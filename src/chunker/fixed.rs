//! Fixed-width sliding-window chunker.

use tracing::warn;

use super::{meta_with_strategy, ChunkPiece};

/// Split `text` into windows of `size` bytes stepping by `size - overlap`.
///
/// Requires `0 < overlap < size`; a degenerate configuration yields zero
/// chunks rather than looping forever. Window edges are nudged to char
/// boundaries so multi-byte text never splits mid-character. The last chunk
/// may be short; whitespace-only windows are dropped.
pub fn chunk_fixed(text: &str, size: usize, overlap: usize) -> Vec<ChunkPiece> {
    if size == 0 || overlap >= size {
        warn!(size, overlap, "invalid fixed-window configuration, emitting no chunks");
        return Vec::new();
    }

    let step = size - overlap;
    let len = text.len();
    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = (start + size).min(len);
        while end < len && !text.is_char_boundary(end) {
            end += 1;
        }

        let window = &text[start..end];
        if !window.trim().is_empty() {
            pieces.push(ChunkPiece {
                text: window.to_string(),
                meta: meta_with_strategy("fixed"),
            });
        }

        if end == len {
            break;
        }

        let mut next = start + step;
        while next < len && !text.is_char_boundary(next) {
            next += 1;
        }
        if next <= start {
            next = end;
        }
        start = next;
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_single_chunk() {
        let pieces = chunk_fixed("hello world", 100, 20);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].text, "hello world");
    }

    #[test]
    fn windows_overlap_by_configured_amount() {
        let text = "abcdefghij";
        let pieces = chunk_fixed(text, 4, 2);
        // step = 2: abcd, cdef, efgh, ghij, ij
        assert_eq!(pieces[0].text, "abcd");
        assert_eq!(pieces[1].text, "cdef");
        assert!(pieces.last().unwrap().text.len() <= 4);
    }

    #[test]
    fn overlap_ge_size_yields_zero_chunks_and_terminates() {
        assert!(chunk_fixed("some text", 10, 10).is_empty());
        assert!(chunk_fixed("some text", 10, 15).is_empty());
        assert!(chunk_fixed("some text", 0, 0).is_empty());
    }

    #[test]
    fn multibyte_text_never_splits_mid_char() {
        let text = "héllo wörld ünïcode çontent".repeat(4);
        for piece in chunk_fixed(&text, 10, 3) {
            // Would have panicked on slice if a boundary was wrong; also
            // verify the text round-trips as valid UTF-8 content.
            assert!(!piece.text.is_empty());
        }
    }

    #[test]
    fn trailing_partial_window_kept() {
        let text = "a".repeat(25);
        let pieces = chunk_fixed(&text, 10, 2);
        let total_unique: usize = pieces.last().unwrap().text.len();
        assert!(total_unique < 10);
    }

    #[test]
    fn whitespace_only_windows_dropped() {
        let text = format!("{}{}", "x".repeat(10), " ".repeat(40));
        let pieces = chunk_fixed(&text, 10, 2);
        assert!(pieces.iter().all(|p| !p.text.trim().is_empty()));
    }
}
