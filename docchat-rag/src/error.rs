//! Error types for the `docchat-rag` crate.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Classification of a failed embedding or language-model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelErrorKind {
    /// The provider throttled the request (HTTP 429). Quota exhaustion is
    /// reported the same way by most providers.
    RateLimited,
    /// The credentials were missing, invalid, or lack permission.
    Auth,
    /// The request never reached the provider or the connection dropped.
    Network,
    /// The provider failed internally (HTTP 5xx).
    Server,
    /// The request or the response was malformed.
    Invalid,
}

impl ModelErrorKind {
    /// Whether a call that failed this way is worth retrying.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::Network | Self::Server)
    }
}

impl fmt::Display for ModelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::RateLimited => "rate limited",
            Self::Auth => "authentication",
            Self::Network => "network",
            Self::Server => "server",
            Self::Invalid => "invalid request",
        };
        f.write_str(label)
    }
}

/// Errors that can occur in document question-answering operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// The source document could not be read or parsed.
    #[error("Load error ({source_name}): {message}")]
    LoadError {
        /// The file or stream that failed to load.
        source_name: String,
        /// A description of the failure.
        message: String,
    },

    /// Embedding a text unit kept failing after all retries.
    #[error("Chunking failed at segment {segment}, offset {offset}: {message}")]
    ChunkingFailed {
        /// Index of the text segment holding the failing unit.
        segment: usize,
        /// Byte offset of the failing unit inside that segment.
        offset: usize,
        /// The last underlying error.
        message: String,
    },

    /// Index storage could not be read or written, or is corrupted.
    #[error("Storage error ({}): {message}", .location.display())]
    StorageError {
        /// The collection directory involved.
        location: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// No persisted index exists for the collection.
    #[error("Index '{collection}' not found in {}", .location.display())]
    NotFound {
        /// The storage location that was searched.
        location: PathBuf,
        /// The requested collection name.
        collection: String,
    },

    /// A build was refused because the collection already holds data.
    #[error(
        "Index '{collection}' already exists in {}; rebuild it explicitly to replace it",
        .location.display()
    )]
    IndexExists {
        /// The storage location.
        location: PathBuf,
        /// The collection name.
        collection: String,
    },

    /// A vector does not match the dimensionality of the index.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality of the index.
        expected: usize,
        /// Dimensionality that was supplied.
        actual: usize,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}, {kind}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// How the call failed.
        kind: ModelErrorKind,
        /// A description of the failure.
        message: String,
    },

    /// A language-model call failed.
    #[error("Model error ({provider}, {kind}): {message}")]
    ModelError {
        /// The model provider that produced the error.
        provider: String,
        /// How the call failed.
        kind: ModelErrorKind,
        /// A description of the failure.
        message: String,
    },

    /// Query expansion failed and retrieval fell back to the original question.
    #[error("Retrieval degraded: {0}")]
    RetrievalDegraded(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An error in the pipeline orchestration.
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RagError {
    /// Build a [`RagError::StorageError`] for `location`.
    pub fn storage(location: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StorageError { location: location.into(), message: message.into() }
    }

    /// Whether retrying the failed call may succeed.
    ///
    /// Only embedding and model failures can be transient; storage corruption
    /// and configuration problems never are.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::EmbeddingError { kind, .. } | Self::ModelError { kind, .. } => {
                kind.is_transient()
            }
            _ => false,
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
