//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;
use tracing::warn;

use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface and must return vectors of the same dimensionality on every call.
/// The default [`embed_batch`](EmbeddingProvider::embed_batch) implementation
/// calls [`embed`](EmbeddingProvider::embed) sequentially; backends that support
/// native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// The default implementation calls [`embed`](EmbeddingProvider::embed)
    /// sequentially for each input.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// A short name used in logs and errors.
    fn name(&self) -> &str {
        "embedder"
    }
}

/// Embed `texts` in batches of at most `batch_size`, retrying transient failures.
///
/// On success the result has exactly one vector per input. When a batch still
/// fails after retries, its texts are embedded one at a time so the error can
/// be returned together with the index of the text that actually fails.
pub(crate) async fn embed_in_batches(
    embedder: &dyn EmbeddingProvider,
    texts: &[&str],
    batch_size: usize,
    retry: &RetryPolicy,
) -> std::result::Result<Vec<Vec<f32>>, (usize, RagError)> {
    let batch_size = batch_size.max(1);
    let mut vectors = Vec::with_capacity(texts.len());
    for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
        let first = batch_index * batch_size;
        let embedded = match retry.run("embed_batch", || embedder.embed_batch(batch)).await {
            Ok(embedded) => embedded,
            Err(e) if batch.len() == 1 => return Err((first, e)),
            Err(e) => {
                warn!(
                    first,
                    batch_len = batch.len(),
                    error = %e,
                    "batch embedding failed, embedding texts one by one"
                );
                embed_one_by_one(embedder, batch, first, retry).await?
            }
        };
        if embedded.len() != batch.len() {
            return Err((
                first,
                RagError::PipelineError(format!(
                    "{} returned {} embeddings for {} texts",
                    embedder.name(),
                    embedded.len(),
                    batch.len()
                )),
            ));
        }
        vectors.extend(embedded);
    }
    Ok(vectors)
}

async fn embed_one_by_one(
    embedder: &dyn EmbeddingProvider,
    batch: &[&str],
    first: usize,
    retry: &RetryPolicy,
) -> std::result::Result<Vec<Vec<f32>>, (usize, RagError)> {
    let mut vectors = Vec::with_capacity(batch.len());
    for (offset, text) in batch.iter().enumerate() {
        let vector = retry
            .run("embed", || embedder.embed(text))
            .await
            .map_err(|e| (first + offset, e))?;
        vectors.push(vector);
    }
    Ok(vectors)
}
