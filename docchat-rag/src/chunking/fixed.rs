//! Character-budget chunking.

use std::collections::VecDeque;

use async_trait::async_trait;

use super::Chunker;
use crate::document::{Chunk, TextSegment};
use crate::error::Result;

/// Separators tried in order, from the coarsest to the finest.
const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "! ", "? ", " "];

/// Splits each segment into chunks of at most `chunk_size` characters.
///
/// Text is cut at paragraph breaks first, then line breaks, sentence ends and
/// finally word boundaries; only a single word longer than `chunk_size` is cut
/// mid-word. Pieces are merged greedily up to `chunk_size`, and up to
/// `chunk_overlap` characters of trailing pieces are repeated at the start of
/// the next chunk. Chunks never cross segment (page) boundaries and inherit the
/// metadata of their segment.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(500, 50);
/// let chunks = chunker.chunk(&segments).await?;
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }

    /// Split one text into chunk strings.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let pieces = split_pieces(text, self.chunk_size, &SEPARATORS);
        merge_pieces(&pieces, self.chunk_size, self.chunk_overlap)
    }
}

#[async_trait]
impl Chunker for FixedSizeChunker {
    fn name(&self) -> &str {
        "fixed_size"
    }

    async fn chunk(&self, segments: &[TextSegment]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for segment in segments {
            for text in self.split_text(&segment.text) {
                if text.trim().is_empty() {
                    continue;
                }
                chunks.push(Chunk::new(chunks.len(), text, segment.metadata.clone()));
            }
        }
        Ok(chunks)
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Cut `text` into pieces of at most `size` characters whose concatenation is `text`.
fn split_pieces<'a>(text: &'a str, size: usize, separators: &[&str]) -> Vec<&'a str> {
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= size {
        return vec![text];
    }
    let Some((separator, rest)) = separators.split_first() else {
        return split_by_chars(text, size);
    };

    let parts = split_keeping_separator(text, separator);
    if parts.len() == 1 {
        return split_pieces(text, size, rest);
    }

    let mut pieces = Vec::new();
    for part in parts {
        if char_len(part) <= size {
            pieces.push(part);
        } else {
            pieces.extend(split_pieces(part, size, rest));
        }
    }
    pieces
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

/// Hard split on character boundaries.
fn split_by_chars(text: &str, size: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (offset, _) in text.char_indices() {
        if count == size {
            pieces.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Greedily merge pieces into chunks, carrying trailing pieces over as overlap.
fn merge_pieces(pieces: &[&str], size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut window_len = 0;

    for piece in pieces {
        let len = char_len(piece);
        if window_len + len > size && !window.is_empty() {
            chunks.push(window.iter().map(|(p, _)| *p).collect::<String>());
            while window_len > overlap || (window_len > 0 && window_len + len > size) {
                if let Some((_, dropped)) = window.pop_front() {
                    window_len -= dropped;
                }
            }
        }
        window.push_back((piece, len));
        window_len += len;
    }

    if !window.is_empty() {
        chunks.push(window.iter().map(|(p, _)| *p).collect::<String>());
    }

    chunks
}
