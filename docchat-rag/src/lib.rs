//! # docchat-rag
//!
//! Retrieval-augmented question answering over a single document.
//!
//! ## Overview
//!
//! A document is loaded into ordered [`TextSegment`]s, split into [`Chunk`]s
//! by a [`Chunker`], embedded and persisted as a [`VectorIndex`]. At query
//! time a [`MultiQueryRetriever`] expands the question into several queries
//! and merges their nearest neighbours, and an [`AnswerSynthesizer`] asks the
//! [`LanguageModel`] for an answer grounded in those chunks.
//!
//! - [`SemanticChunker`] places boundaries where consecutive sentences drift
//!   apart in embedding space, using a pluggable [`BreakpointThreshold`]
//! - [`FixedSizeChunker`] splits by character budget with overlap
//! - [`IndexRegistry`] opens an existing index or builds it exactly once, even
//!   when several callers race for the same collection
//! - [`ChatSession`] keeps one conversation over a shared [`RagPipeline`]
//!
//! ## Features
//!
//! - `gemini` (default): Gemini embedding and chat clients
//! - `pdf` (default): [`PdfLoader`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docchat_rag::*;
//!
//! let config = RagConfig::from_env()?;
//! let embedder: Arc<dyn EmbeddingProvider> = Arc::new(gemini::GeminiEmbeddingProvider::new(&key));
//! let llm: Arc<dyn LanguageModel> = Arc::new(gemini::GeminiModel::new(&key));
//!
//! let source = DocumentChunkSource::new(
//!     Arc::new(PdfLoader::from_path("report.pdf")),
//!     chunker_for(&config, embedder.clone()),
//! );
//! let registry = IndexRegistry::with_options(BuildOptions::from(&config));
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
//! let mut session = ChatSession::new(Arc::new(pipeline));
//! let answer = session.ask("What is the main topic?").await?;
//! ```

pub mod chunking;
pub mod config;
pub mod conversation;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm;
pub mod loader;
pub mod pipeline;
pub mod retriever;
pub mod retry;
pub mod session;
pub mod similarity;
pub mod synthesizer;

#[cfg(feature = "gemini")]
pub mod gemini;

pub use chunking::{Chunker, FixedSizeChunker, SemanticChunker, chunker_for};
pub use config::{BreakpointThreshold, ChunkingPolicy, RagConfig, RagConfigBuilder, ThresholdType};
pub use conversation::{Conversation, ConversationStats, ConversationTurn, Role};
pub use document::{Chunk, SearchResult, TextSegment};
pub use embedding::EmbeddingProvider;
pub use error::{ModelErrorKind, RagError, Result};
pub use index::{
    BuildOptions, ChunkSource, DocumentChunkSource, IndexEntry, IndexRegistry, VectorIndex,
};
pub use llm::{LanguageModel, TextStream};
#[cfg(feature = "pdf")]
pub use loader::PdfLoader;
pub use loader::{DocumentLoader, TextLoader, loader_for_path};
pub use pipeline::{Answer, RagPipeline, RagPipelineBuilder, StreamingAnswer};
pub use retriever::{MultiQueryRetriever, RetrievalResult};
pub use retry::RetryPolicy;
pub use session::ChatSession;
pub use synthesizer::AnswerSynthesizer;
