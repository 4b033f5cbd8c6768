//! Data types for text segments, chunks, and search results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata key holding the page a segment or chunk starts on.
pub const PAGE_KEY: &str = "page";
/// Metadata key holding the last page a chunk spans, when it spans several.
pub const PAGE_END_KEY: &str = "page_end";
/// Metadata key holding the file a segment was read from.
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding a chunk's ordinal position.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// A raw unit of input text, as produced by a [`DocumentLoader`](crate::DocumentLoader).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextSegment {
    /// The text content of the segment.
    pub text: String,
    /// Source metadata such as the page number.
    pub metadata: HashMap<String, String>,
}

impl TextSegment {
    /// Create a segment without metadata.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), metadata: HashMap::new() }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The page number recorded for this segment, if any.
    pub fn page(&self) -> Option<u32> {
        self.metadata.get(PAGE_KEY).and_then(|p| p.parse().ok())
    }
}

/// A contiguous span of source text treated as one retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk.
    pub id: String,
    /// Ordinal position of the chunk in its source; breaks score ties.
    pub index: usize,
    /// The text content of the chunk.
    pub text: String,
    /// Metadata inherited from the source segment plus chunk-specific fields.
    pub metadata: HashMap<String, String>,
    /// The vector embedding for this chunk's text; empty until computed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl Chunk {
    /// Create a chunk without an embedding.
    pub fn new(index: usize, text: impl Into<String>, metadata: HashMap<String, String>) -> Self {
        let mut metadata = metadata;
        metadata.insert(CHUNK_INDEX_KEY.to_string(), index.to_string());
        Self {
            id: format!("chunk-{index:06}"),
            index,
            text: text.into(),
            metadata,
            embedding: Vec::new(),
        }
    }

    /// Whether an embedding has been attached.
    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The cosine similarity score (higher is more relevant).
    pub score: f32,
}
