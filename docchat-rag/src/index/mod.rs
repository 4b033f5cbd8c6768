//! Persistent vector index.
//!
//! A [`VectorIndex`] owns every entry of one collection. It is created once by
//! [`VectorIndex::build`], reopened by [`VectorIndex::open`] on later starts,
//! and only replaced through the explicit [`VectorIndex::rebuild`]. Handles are
//! immutable, so a shared `Arc<VectorIndex>` can serve concurrent searches.
//!
//! # Example
//!
//! ```rust,ignore
//! use docchat_rag::VectorIndex;
//!
//! let index = match VectorIndex::open("my_chroma_db", "sample", embedder.as_ref()).await {
//!     Ok(index) => index,
//!     Err(RagError::NotFound { .. }) => {
//!         VectorIndex::build(chunks, embedder.as_ref(), "my_chroma_db", "sample").await?
//!     }
//!     Err(e) => return Err(e),
//! };
//! let hits = index.search(&query_vector, 3)?;
//! ```

mod registry;
pub(crate) mod storage;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

pub use registry::{ChunkSource, DocumentChunkSource, IndexRegistry};
pub use storage::Manifest;

use crate::config::RagConfig;
use crate::document::{Chunk, SearchResult};
use crate::embedding::{EmbeddingProvider, embed_in_batches};
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;
use crate::similarity::cosine_similarity;

/// One persisted chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// Identifier of the stored chunk.
    pub chunk_id: String,
    /// Ordinal position of the chunk in its source.
    pub chunk_index: usize,
    /// Embedding of the chunk text.
    pub vector: Vec<f32>,
    /// The chunk text.
    pub text: String,
    /// Source metadata of the chunk.
    pub metadata: HashMap<String, String>,
}

impl IndexEntry {
    fn to_chunk(&self) -> Chunk {
        Chunk {
            id: self.chunk_id.clone(),
            index: self.chunk_index,
            text: self.text.clone(),
            metadata: self.metadata.clone(),
            embedding: Vec::new(),
        }
    }
}

/// Embedding settings used while building an index.
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Maximum number of chunk texts per embedding request.
    pub batch_size: usize,
    /// Retry policy for transient embedding failures.
    pub retry: RetryPolicy,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { batch_size: 100, retry: RetryPolicy::default() }
    }
}

impl From<&RagConfig> for BuildOptions {
    fn from(config: &RagConfig) -> Self {
        Self { batch_size: config.embed_batch_size, retry: config.retry }
    }
}

/// A loaded collection of embedded chunks supporting nearest-neighbour search.
#[derive(Debug)]
pub struct VectorIndex {
    location: PathBuf,
    collection: String,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Reopen a persisted collection.
    ///
    /// # Errors
    ///
    /// - [`RagError::NotFound`] if nothing was ever built at `location` for `collection`
    /// - [`RagError::StorageError`] if the collection directory is unreadable or corrupted
    /// - [`RagError::DimensionMismatch`] if `embedder` produces vectors of another size
    pub async fn open(
        location: impl AsRef<Path>,
        collection: &str,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self> {
        storage::validate_collection_name(collection)?;
        let location = location.as_ref().to_path_buf();
        let dir = storage::collection_dir(&location, collection);

        let loaded = {
            let collection = collection.to_string();
            let read_dir = dir.clone();
            tokio::task::spawn_blocking(move || storage::read_collection(&read_dir, &collection))
                .await
                .map_err(|e| RagError::storage(&dir, format!("load task failed: {e}")))??
        };

        let Some((manifest, entries)) = loaded else {
            return Err(RagError::NotFound { location, collection: collection.to_string() });
        };

        if manifest.entry_count > 0 && embedder.dimensions() != manifest.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: manifest.dimensions,
                actual: embedder.dimensions(),
            });
        }

        info!(
            collection,
            location = %location.display(),
            entry_count = entries.len(),
            "opened existing index"
        );
        Ok(Self {
            location,
            collection: collection.to_string(),
            dimensions: manifest.dimensions,
            entries,
        })
    }

    /// Embed and persist `chunks` as a new collection.
    ///
    /// Chunks that already carry an embedding are stored as is.
    ///
    /// # Errors
    ///
    /// - [`RagError::IndexExists`] if the collection already holds data; use
    ///   [`rebuild`](Self::rebuild) to replace it deliberately
    /// - [`RagError::EmbeddingError`] if embedding fails after retries
    /// - [`RagError::StorageError`] if writing fails
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
        location: impl AsRef<Path>,
        collection: &str,
    ) -> Result<Self> {
        Self::build_with(chunks, embedder, location, collection, BuildOptions::default()).await
    }

    /// [`build`](Self::build) with explicit embedding settings.
    pub async fn build_with(
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
        location: impl AsRef<Path>,
        collection: &str,
        options: BuildOptions,
    ) -> Result<Self> {
        Self::write(chunks, embedder, location.as_ref(), collection, options, false).await
    }

    /// Replace whatever is stored for the collection with `chunks`.
    pub async fn rebuild(
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
        location: impl AsRef<Path>,
        collection: &str,
        options: BuildOptions,
    ) -> Result<Self> {
        Self::write(chunks, embedder, location.as_ref(), collection, options, true).await
    }

    async fn write(
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
        location: &Path,
        collection: &str,
        options: BuildOptions,
        overwrite: bool,
    ) -> Result<Self> {
        storage::validate_collection_name(collection)?;
        let dir = storage::collection_dir(location, collection);

        // Refuse early, before paying for embeddings.
        if !overwrite && storage::has_data(&dir)? {
            return Err(RagError::IndexExists {
                location: location.to_path_buf(),
                collection: collection.to_string(),
            });
        }

        let entries = embed_entries(chunks, embedder, options).await?;
        let dimensions = entries.first().map_or(embedder.dimensions(), |e| e.vector.len());

        let (entries, manifest) = {
            let location = location.to_path_buf();
            let collection = collection.to_string();
            tokio::task::spawn_blocking(move || {
                storage::write_collection(&location, &collection, dimensions, &entries, overwrite)
                    .map(|manifest| (entries, manifest))
            })
            .await
            .map_err(|e| RagError::storage(&dir, format!("write task failed: {e}")))??
        };

        info!(
            collection,
            location = %location.display(),
            entry_count = manifest.entry_count,
            dimensions,
            rebuild = overwrite,
            "index persisted"
        );
        Ok(Self {
            location: location.to_path_buf(),
            collection: collection.to_string(),
            dimensions,
            entries,
        })
    }

    /// Return the `k` entries most similar to `query`, best first.
    ///
    /// Scores are cosine similarities; ties keep insertion order. Returned
    /// chunks do not carry their embeddings.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if `query` has the wrong size.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, cosine_similarity(&entry.vector, query)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| SearchResult {
                chunk: self.entries[position].to_chunk(),
                score,
            })
            .collect())
    }

    /// The storage location the collection lives under.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// The collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Dimensionality of every stored vector.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored entries in insertion order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}

/// Attach missing embeddings and check that every vector has the same size.
async fn embed_entries(
    chunks: Vec<Chunk>,
    embedder: &dyn EmbeddingProvider,
    options: BuildOptions,
) -> Result<Vec<IndexEntry>> {
    let missing: Vec<usize> =
        chunks.iter().enumerate().filter(|(_, c)| !c.has_embedding()).map(|(i, _)| i).collect();

    let mut vectors: HashMap<usize, Vec<f32>> = HashMap::with_capacity(missing.len());
    if !missing.is_empty() {
        let texts: Vec<&str> = missing.iter().map(|&i| chunks[i].text.as_str()).collect();
        let embedded = embed_in_batches(embedder, &texts, options.batch_size, &options.retry)
            .await
            .map_err(|(first, e)| {
                error!(
                    chunk.id = %chunks[missing[first]].id,
                    error = %e,
                    "embedding failed during index build"
                );
                e
            })?;
        vectors.extend(missing.into_iter().zip(embedded));
    }

    let mut dimensions = None;
    let mut entries = Vec::with_capacity(chunks.len());
    for (position, chunk) in chunks.into_iter().enumerate() {
        let vector = vectors.remove(&position).unwrap_or(chunk.embedding);
        let expected = *dimensions.get_or_insert(vector.len());
        if vector.is_empty() || vector.len() != expected {
            return Err(RagError::DimensionMismatch { expected, actual: vector.len() });
        }
        entries.push(IndexEntry {
            chunk_id: chunk.id,
            chunk_index: chunk.index,
            vector,
            text: chunk.text,
            metadata: chunk.metadata,
        });
    }
    Ok(entries)
}
