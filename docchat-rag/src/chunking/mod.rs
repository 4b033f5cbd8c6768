//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations, selected
//! by [`ChunkingPolicy`]:
//!
//! - [`FixedSizeChunker`]: splits by character budget with configurable overlap
//! - [`SemanticChunker`]: splits where adjacent sentences diverge in embedding space

mod fixed;
mod semantic;
mod threshold;

use std::sync::Arc;

use async_trait::async_trait;

pub use fixed::FixedSizeChunker;
pub use semantic::SemanticChunker;

use crate::config::{ChunkingPolicy, RagConfig};
use crate::document::{Chunk, TextSegment};
use crate::embedding::EmbeddingProvider;
use crate::error::Result;

/// A strategy for splitting text segments into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no embeddings;
/// embeddings are attached when the index is built. Chunk indices start at zero
/// and follow input order.
#[async_trait]
pub trait Chunker: Send + Sync {
    /// A short name used in logs.
    fn name(&self) -> &str;

    /// Split the ordered segments of one document into chunks.
    ///
    /// Returns an empty `Vec` when the segments hold no text.
    async fn chunk(&self, segments: &[TextSegment]) -> Result<Vec<Chunk>>;
}

/// Build the chunker selected by the configured [`ChunkingPolicy`].
pub fn chunker_for(config: &RagConfig, embedder: Arc<dyn EmbeddingProvider>) -> Arc<dyn Chunker> {
    match &config.chunking {
        ChunkingPolicy::FixedSize { chunk_size, chunk_overlap } => {
            Arc::new(FixedSizeChunker::new(*chunk_size, *chunk_overlap))
        }
        ChunkingPolicy::Semantic { threshold, buffer_size } => Arc::new(
            SemanticChunker::new(embedder, *threshold)
                .with_buffer_size(*buffer_size)
                .with_batch_size(config.embed_batch_size)
                .with_retry(config.retry),
        ),
    }
}
