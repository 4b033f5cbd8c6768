//! Language-model capability used for query expansion and answer synthesis.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;

/// A finite, non-restartable sequence of generated text fragments.
///
/// Fragments arrive in generation order; concatenating them yields the full
/// response. Dropping the stream stops consumption.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A text-completion backend.
///
/// Failures are reported as [`RagError::ModelError`](crate::RagError::ModelError)
/// with a [`ModelErrorKind`](crate::ModelErrorKind) separating quota and
/// credential problems from transient network faults.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// A short name used in logs and errors.
    fn name(&self) -> &str;

    /// Return the complete response to `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Return the response to `prompt` as it is generated.
    ///
    /// The default implementation yields the result of
    /// [`complete`](LanguageModel::complete) as a single fragment.
    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        let text = self.complete(prompt).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}
