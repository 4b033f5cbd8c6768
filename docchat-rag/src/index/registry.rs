//! Startup coordination: open an index if it exists, build it exactly once otherwise.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{BuildOptions, VectorIndex};
use crate::chunking::Chunker;
use crate::document::Chunk;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::loader::DocumentLoader;

/// Supplies the chunks for a collection that still has to be built.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Produce the ordered chunks of the source document.
    async fn load_chunks(&self) -> Result<Vec<Chunk>>;
}

/// A [`ChunkSource`] that runs a loader through a chunker.
pub struct DocumentChunkSource {
    loader: Arc<dyn DocumentLoader>,
    chunker: Arc<dyn Chunker>,
}

impl DocumentChunkSource {
    /// Combine a loader and a chunker.
    pub fn new(loader: Arc<dyn DocumentLoader>, chunker: Arc<dyn Chunker>) -> Self {
        Self { loader, chunker }
    }
}

#[async_trait]
impl ChunkSource for DocumentChunkSource {
    async fn load_chunks(&self) -> Result<Vec<Chunk>> {
        let segments = self.loader.load().await?;
        debug!(
            source = self.loader.source_name(),
            segment_count = segments.len(),
            "document loaded"
        );
        let chunks = self.chunker.chunk(&segments).await?;
        info!(
            source = self.loader.source_name(),
            chunker = self.chunker.name(),
            chunk_count = chunks.len(),
            "document chunked"
        );
        Ok(chunks)
    }
}

type Slot = Arc<Mutex<Option<Arc<VectorIndex>>>>;

/// Hands out shared index handles, one per `(location, collection)`.
///
/// Every key has its own async mutex. The first caller for a missing
/// collection builds it while later callers wait on the same mutex and then
/// receive the handle it produced, so concurrent startups run a single build.
#[derive(Default)]
pub struct IndexRegistry {
    slots: Mutex<HashMap<(PathBuf, String), Slot>>,
    options: BuildOptions,
    builds: AtomicUsize,
}

impl IndexRegistry {
    /// Create a registry with default embedding settings for builds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that builds with the given embedding settings.
    pub fn with_options(options: BuildOptions) -> Self {
        Self { options, ..Self::default() }
    }

    /// Number of builds and rebuilds this registry has run.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Open the collection, or build it from `source` if nothing is persisted.
    ///
    /// # Errors
    ///
    /// Any error from [`VectorIndex::open`] other than [`RagError::NotFound`],
    /// and any error from loading, chunking or building, is returned as is.
    pub async fn get_or_build(
        &self,
        location: impl AsRef<Path>,
        collection: &str,
        source: &dyn ChunkSource,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Arc<VectorIndex>> {
        let location = location.as_ref();
        let slot = self.slot(location, collection).await?;
        let mut guard = slot.lock().await;
        if let Some(index) = guard.as_ref() {
            return Ok(Arc::clone(index));
        }

        let index = match VectorIndex::open(location, collection, embedder).await {
            Ok(index) => index,
            Err(RagError::NotFound { .. }) => {
                info!(collection, location = %location.display(), "no persisted index, building");
                let chunks = source.load_chunks().await?;
                self.builds.fetch_add(1, Ordering::SeqCst);
                VectorIndex::build_with(chunks, embedder, location, collection, self.options).await?
            }
            Err(e) => return Err(e),
        };

        let index = Arc::new(index);
        *guard = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Replace the collection with freshly chunked content from `source`.
    ///
    /// Handles returned earlier keep serving the old entries.
    pub async fn rebuild(
        &self,
        location: impl AsRef<Path>,
        collection: &str,
        source: &dyn ChunkSource,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Arc<VectorIndex>> {
        let location = location.as_ref();
        let slot = self.slot(location, collection).await?;
        let mut guard = slot.lock().await;

        info!(collection, location = %location.display(), "rebuilding index");
        let chunks = source.load_chunks().await?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        let index = Arc::new(
            VectorIndex::rebuild(chunks, embedder, location, collection, self.options).await?,
        );
        *guard = Some(Arc::clone(&index));
        Ok(index)
    }

    async fn slot(&self, location: &Path, collection: &str) -> Result<Slot> {
        let key = resolve_location(location).map_err(|e| {
            RagError::storage(location, format!("cannot resolve storage location: {e}"))
        })?;
        let mut slots = self.slots.lock().await;
        Ok(Arc::clone(slots.entry((key, collection.to_string())).or_default()))
    }
}

/// Canonical form of `location`, even when it does not exist yet.
///
/// The deepest existing ancestor is canonicalized (resolving symlinks) and the
/// missing components are appended, so the key is stable before and after the
/// directory is created.
fn resolve_location(location: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(location)?;
    let mut missing = Vec::new();
    let mut existing = absolute.as_path();
    loop {
        match fs::canonicalize(existing) {
            Ok(mut resolved) => {
                resolved.extend(missing.iter().rev());
                return Ok(resolved);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                    return Ok(absolute.clone());
                };
                missing.push(name);
                existing = parent;
            }
            Err(e) => return Err(e),
        }
    }
}
