//! Embedding-distance chunking.
//!
//! The document is flattened into sentences, each sentence is embedded
//! together with its neighbours, and a chunk boundary is placed wherever the
//! cosine distance between consecutive sentence windows exceeds the configured
//! [`BreakpointThreshold`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::Chunker;
use crate::config::BreakpointThreshold;
use crate::document::{Chunk, PAGE_END_KEY, PAGE_KEY, TextSegment};
use crate::embedding::{EmbeddingProvider, embed_in_batches};
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;
use crate::similarity::cosine_distance;

/// A sentence-level unit of text with its position in the input.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Unit<'a> {
    /// Index of the segment holding the unit.
    pub segment: usize,
    /// Byte offset of the unit inside its segment.
    pub offset: usize,
    /// Trimmed sentence text.
    pub text: &'a str,
}

/// Splits text where consecutive sentences drift apart in embedding space.
///
/// Empty input yields no chunks; input with a single sentence, or without any
/// distance above the threshold, yields exactly one chunk. Chunk text is the
/// space-joined run of sentences between two breakpoints, so joining all
/// chunks with single spaces reproduces the input with inter-sentence
/// whitespace collapsed.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::{BreakpointThreshold, SemanticChunker};
///
/// let chunker = SemanticChunker::new(embedder, BreakpointThreshold::percentile(70.0));
/// let chunks = chunker.chunk(&segments).await?;
/// ```
pub struct SemanticChunker {
    embedder: Arc<dyn EmbeddingProvider>,
    threshold: BreakpointThreshold,
    buffer_size: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl SemanticChunker {
    /// Create a chunker with a buffer of one sentence and the default retry policy.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, threshold: BreakpointThreshold) -> Self {
        Self { embedder, threshold, buffer_size: 1, batch_size: 100, retry: RetryPolicy::default() }
    }

    /// Set how many neighbouring sentences on each side are embedded with a sentence.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the maximum number of texts per embedding request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the retry policy for embedding calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sentence windows used for embedding: each unit with `buffer_size` neighbours per side.
    fn windows(&self, units: &[Unit<'_>]) -> Vec<String> {
        (0..units.len())
            .map(|i| {
                let start = i.saturating_sub(self.buffer_size);
                let end = (i + self.buffer_size + 1).min(units.len());
                units[start..end].iter().map(|u| u.text).collect::<Vec<_>>().join(" ")
            })
            .collect()
    }
}

#[async_trait]
impl Chunker for SemanticChunker {
    fn name(&self) -> &str {
        "semantic"
    }

    async fn chunk(&self, segments: &[TextSegment]) -> Result<Vec<Chunk>> {
        let units = split_units(segments);
        if units.is_empty() {
            return Ok(Vec::new());
        }
        if units.len() == 1 {
            return Ok(vec![build_chunk(0, &units, segments)]);
        }

        let windows = self.windows(&units);
        let texts: Vec<&str> = windows.iter().map(String::as_str).collect();
        debug!(
            unit_count = units.len(),
            buffer_size = self.buffer_size,
            "embedding sentence windows"
        );

        let embeddings =
            embed_in_batches(self.embedder.as_ref(), &texts, self.batch_size, &self.retry)
                .await
                .map_err(|(index, e)| {
                    let unit = &units[index];
                    error!(
                        segment = unit.segment,
                        offset = unit.offset,
                        error = %e,
                        "embedding failed during chunking"
                    );
                    RagError::ChunkingFailed {
                        segment: unit.segment,
                        offset: unit.offset,
                        message: e.to_string(),
                    }
                })?;

        let distances: Vec<f32> =
            embeddings.windows(2).map(|pair| cosine_distance(&pair[0], &pair[1])).collect();
        let breakpoints = self.threshold.breakpoints(&distances);

        let mut chunks = Vec::with_capacity(breakpoints.len() + 1);
        let mut start = 0;
        for end in breakpoints.into_iter().map(|b| b + 1).chain(std::iter::once(units.len())) {
            chunks.push(build_chunk(chunks.len(), &units[start..end], segments));
            start = end;
        }

        info!(
            unit_count = units.len(),
            chunk_count = chunks.len(),
            threshold_type = %self.threshold.threshold_type,
            amount = self.threshold.amount,
            "semantic chunking complete"
        );
        Ok(chunks)
    }
}

/// Build one chunk from a non-empty run of units.
fn build_chunk(index: usize, units: &[Unit<'_>], segments: &[TextSegment]) -> Chunk {
    let first = &units[0];
    let last = &units[units.len() - 1];
    let text = units.iter().map(|u| u.text).collect::<Vec<_>>().join(" ");

    let mut metadata: HashMap<String, String> = segments[first.segment].metadata.clone();
    if last.segment != first.segment {
        if let Some(page) = segments[last.segment].metadata.get(PAGE_KEY) {
            if metadata.get(PAGE_KEY) != Some(page) {
                metadata.insert(PAGE_END_KEY.to_string(), page.clone());
            }
        }
    }
    Chunk::new(index, text, metadata)
}

/// Flatten segments into trimmed sentences, in order.
///
/// A sentence ends at a run of whitespace that follows `.`, `?` or `!`.
pub(crate) fn split_units(segments: &[TextSegment]) -> Vec<Unit<'_>> {
    let mut units = Vec::new();
    for (segment_index, segment) in segments.iter().enumerate() {
        let text = segment.text.as_str();
        let mut start = 0;
        let mut prev: Option<char> = None;
        let mut chars = text.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            if c.is_whitespace() && matches!(prev, Some('.' | '?' | '!')) {
                push_unit(&mut units, segment_index, text, start, pos);
                let mut next = pos + c.len_utf8();
                while let Some((p, w)) = chars.peek().copied() {
                    if !w.is_whitespace() {
                        break;
                    }
                    next = p + w.len_utf8();
                    chars.next();
                }
                start = next;
                prev = None;
                continue;
            }
            prev = Some(c);
        }
        push_unit(&mut units, segment_index, text, start, text.len());
    }
    units
}

fn push_unit<'a>(
    units: &mut Vec<Unit<'a>>,
    segment: usize,
    text: &'a str,
    start: usize,
    end: usize,
) {
    let raw = &text[start..end];
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    let leading = raw.len() - raw.trim_start().len();
    units.push(Unit { segment, offset: start + leading, text: trimmed });
}
