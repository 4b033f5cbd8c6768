//! Question-answering pipeline.
//!
//! The [`RagPipeline`] answers a question against one loaded [`VectorIndex`]
//! by composing a [`MultiQueryRetriever`] and an [`AnswerSynthesizer`]. It holds
//! no per-conversation state, so one pipeline can be shared by many
//! [`ChatSession`](crate::ChatSession)s.
//!
//! # Example
//!
//! ```rust,ignore
//! use docchat_rag::{IndexRegistry, RagConfig, RagPipeline};
//!
//! let config = RagConfig::from_env()?;
//! let index = registry
//!     .get_or_build(&config.storage_dir, &config.collection_name, &source, embedder.as_ref())
//!     .await?;
//!
//! let pipeline = RagPipeline::builder()
//!     .config(config)
//!     .embedding_provider(embedder)
//!     .language_model(llm)
//!     .index(index)
//!     .build()?;
//!
//! let answer = pipeline.answer(&Conversation::new(), "What is the main topic?").await?;
//! ```

use std::sync::Arc;

use futures::StreamExt;
use tracing::{error, info};

use crate::config::RagConfig;
use crate::conversation::Conversation;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::llm::{LanguageModel, TextStream};
use crate::retriever::{MultiQueryRetriever, RetrievalResult};
use crate::synthesizer::AnswerSynthesizer;

/// A completed answer and the retrieval it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    /// The model's response.
    pub text: String,
    /// Chunks and queries used to build the prompt.
    pub retrieval: RetrievalResult,
}

/// An answer still being generated.
pub struct StreamingAnswer {
    /// Chunks and queries used to build the prompt.
    pub retrieval: RetrievalResult,
    /// Response fragments in generation order.
    pub fragments: TextStream,
}

impl StreamingAnswer {
    /// Drain the fragments, calling `on_fragment` for each, and return the full answer.
    ///
    /// Stops at the first failed fragment.
    pub async fn collect_with<F>(self, mut on_fragment: F) -> Result<Answer>
    where
        F: FnMut(&str),
    {
        let Self { retrieval, mut fragments } = self;
        let mut text = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            on_fragment(&fragment);
            text.push_str(&fragment);
        }
        Ok(Answer { text, retrieval })
    }
}

/// Retrieval plus synthesis over one shared index.
///
/// Construct one via [`RagPipeline::builder()`].
pub struct RagPipeline {
    config: RagConfig,
    index: Arc<VectorIndex>,
    retriever: MultiQueryRetriever,
    synthesizer: AnswerSynthesizer,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return the index answers are grounded on.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Run multi-query retrieval for `question`.
    pub async fn retrieve(&self, question: &str) -> Result<RetrievalResult> {
        self.retriever.retrieve(question, &self.index).await.map_err(|e| {
            error!(collection = self.index.collection(), error = %e, "retrieval failed");
            e
        })
    }

    /// Answer `question` given the conversation so far.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval or the model call fails. A failed
    /// expansion step alone is not an error; see [`RetrievalResult::degraded`].
    pub async fn answer(&self, history: &Conversation, question: &str) -> Result<Answer> {
        let retrieval = self.retrieve(question).await?;
        let text = self.synthesizer.synthesize(history, &retrieval.results, question).await?;
        info!(
            context_chunks = retrieval.results.len(),
            answer_len = text.len(),
            degraded = retrieval.is_degraded(),
            "answered question"
        );
        Ok(Answer { text, retrieval })
    }

    /// Answer `question`, returning the response as it is generated.
    pub async fn answer_stream(
        &self,
        history: &Conversation,
        question: &str,
    ) -> Result<StreamingAnswer> {
        let retrieval = self.retrieve(question).await?;
        let fragments =
            self.synthesizer.synthesize_stream(history, &retrieval.results, question).await?;
        Ok(StreamingAnswer { retrieval, fragments })
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// Every field except `config` is required; a missing config falls back to
/// [`RagConfig::default()`].
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = RagPipeline::builder()
///     .config(RagConfig::default())
///     .embedding_provider(Arc::new(embedder))
///     .language_model(Arc::new(llm))
///     .index(index)
///     .build()?;
/// ```
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    index: Option<Arc<VectorIndex>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider used for queries.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the language model used for expansion and synthesis.
    pub fn language_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(llm);
        self
    }

    /// Set the index to answer from.
    pub fn index(mut self, index: Arc<VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Build the [`RagPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required field is missing, or
    /// [`RagError::DimensionMismatch`] if the embedder does not fit the index.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let language_model = self
            .language_model
            .ok_or_else(|| RagError::ConfigError("language_model is required".to_string()))?;
        let index =
            self.index.ok_or_else(|| RagError::ConfigError("index is required".to_string()))?;

        if !index.is_empty() && index.dimensions() != embedding_provider.dimensions() {
            return Err(RagError::DimensionMismatch {
                expected: index.dimensions(),
                actual: embedding_provider.dimensions(),
            });
        }

        let retriever = MultiQueryRetriever::from_config(
            &config,
            embedding_provider,
            Arc::clone(&language_model),
        );
        let synthesizer = AnswerSynthesizer::new(language_model).with_retry(config.retry);
        Ok(RagPipeline { config, index, retriever, synthesizer })
    }
}
