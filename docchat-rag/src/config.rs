//! Configuration for the question-answering pipeline.
//!
//! A [`RagConfig`] is built once at startup, either through
//! [`RagConfig::builder()`] or from `DOCCHAT_*` environment variables with
//! [`RagConfig::from_env()`], and handed to each component.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// How the breakpoint threshold is derived from the adjacent-unit distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdType {
    /// Split where the distance exceeds the Nth percentile of all distances.
    Percentile,
    /// Split where the distance exceeds `mean + amount * stddev`.
    StandardDeviation,
    /// Split where the distance exceeds `mean + amount * IQR`.
    Interquartile,
    /// Split where the distance exceeds `amount` itself.
    Absolute,
}

impl ThresholdType {
    /// The amount used when none is configured.
    pub fn default_amount(self) -> f64 {
        match self {
            Self::Percentile => 70.0,
            Self::StandardDeviation => 3.0,
            Self::Interquartile => 1.5,
            Self::Absolute => 0.5,
        }
    }

    /// The configuration tag for this threshold type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Percentile => "percentile",
            Self::StandardDeviation => "standard_deviation",
            Self::Interquartile => "interquartile",
            Self::Absolute => "absolute",
        }
    }
}

impl fmt::Display for ThresholdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "percentile" => Ok(Self::Percentile),
            "standard_deviation" | "stddev" => Ok(Self::StandardDeviation),
            "interquartile" | "iqr" => Ok(Self::Interquartile),
            "absolute" => Ok(Self::Absolute),
            other => Err(RagError::ConfigError(format!("unknown threshold type '{other}'"))),
        }
    }
}

/// A threshold type together with its amount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakpointThreshold {
    /// How the threshold is derived.
    pub threshold_type: ThresholdType,
    /// Percentile, multiplier, or absolute distance, depending on the type.
    pub amount: f64,
}

impl BreakpointThreshold {
    /// A threshold of the given type with its default amount.
    pub fn of(threshold_type: ThresholdType) -> Self {
        Self { threshold_type, amount: threshold_type.default_amount() }
    }

    /// A percentile threshold.
    pub fn percentile(amount: f64) -> Self {
        Self { threshold_type: ThresholdType::Percentile, amount }
    }

    fn validate(&self) -> Result<()> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(RagError::ConfigError(format!(
                "threshold amount must be a non-negative number, got {}",
                self.amount
            )));
        }
        if self.threshold_type == ThresholdType::Percentile && self.amount > 100.0 {
            return Err(RagError::ConfigError(format!(
                "percentile threshold must be within 0..=100, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

impl Default for BreakpointThreshold {
    fn default() -> Self {
        Self::of(ThresholdType::Percentile)
    }
}

/// Which splitter turns text segments into chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkingPolicy {
    /// Character-budget splitting on paragraph, line, sentence, then word boundaries.
    FixedSize {
        /// Maximum number of characters per chunk.
        chunk_size: usize,
        /// Characters carried over from the end of one chunk into the next.
        chunk_overlap: usize,
    },
    /// Embedding-distance splitting between sentences.
    Semantic {
        /// How breakpoints are chosen.
        threshold: BreakpointThreshold,
        /// Neighbouring sentences embedded together with each sentence.
        buffer_size: usize,
    },
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self::Semantic { threshold: BreakpointThreshold::default(), buffer_size: 1 }
    }
}

impl ChunkingPolicy {
    /// The fixed-size policy with the classic 500/50 budget.
    pub fn fixed_size() -> Self {
        Self::FixedSize { chunk_size: 500, chunk_overlap: 50 }
    }

    /// Whether chunking needs an embedding provider.
    pub fn is_semantic(&self) -> bool {
        matches!(self, Self::Semantic { .. })
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::FixedSize { chunk_size, chunk_overlap } => {
                if *chunk_size == 0 {
                    return Err(RagError::ConfigError(
                        "chunk_size must be greater than zero".to_string(),
                    ));
                }
                if chunk_overlap >= chunk_size {
                    return Err(RagError::ConfigError(format!(
                        "chunk_overlap ({chunk_overlap}) must be less than \
                         chunk_size ({chunk_size})"
                    )));
                }
                Ok(())
            }
            Self::Semantic { threshold, .. } => threshold.validate(),
        }
    }
}

/// Configuration parameters for the question-answering pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Name of the persisted collection.
    pub collection_name: String,
    /// Directory holding one sub-directory per collection.
    pub storage_dir: PathBuf,
    /// How documents are split into chunks.
    pub chunking: ChunkingPolicy,
    /// Number of alternative phrasings generated per question.
    pub query_count: usize,
    /// Nearest neighbours fetched for each query.
    pub k_per_query: usize,
    /// Optional cap on the merged result count.
    pub max_results: Option<usize>,
    /// Retry policy for transient embedding and model failures.
    pub retry: RetryPolicy,
    /// Maximum number of texts sent in one embedding request.
    pub embed_batch_size: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            collection_name: "sample".to_string(),
            storage_dir: PathBuf::from("my_chroma_db"),
            chunking: ChunkingPolicy::default(),
            query_count: 3,
            k_per_query: 3,
            max_results: None,
            retry: RetryPolicy::default(),
            embed_batch_size: 100,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Read the configuration from `DOCCHAT_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed values are errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(name) = lookup("DOCCHAT_COLLECTION") {
            builder = builder.collection_name(name);
        }
        if let Some(dir) = lookup("DOCCHAT_STORAGE_DIR") {
            builder = builder.storage_dir(dir);
        }

        let chunking = lookup("DOCCHAT_CHUNKING").unwrap_or_else(|| "semantic".to_string());
        let policy = match chunking.trim().to_ascii_lowercase().as_str() {
            "semantic" => {
                let threshold_type = match lookup("DOCCHAT_THRESHOLD_TYPE") {
                    Some(tag) => tag.parse()?,
                    None => ThresholdType::Percentile,
                };
                let amount = parse_var(&lookup, "DOCCHAT_THRESHOLD_AMOUNT")?
                    .unwrap_or_else(|| threshold_type.default_amount());
                let buffer_size = parse_var(&lookup, "DOCCHAT_BUFFER_SIZE")?.unwrap_or(1);
                ChunkingPolicy::Semantic {
                    threshold: BreakpointThreshold { threshold_type, amount },
                    buffer_size,
                }
            }
            "fixed" | "fixed_size" => ChunkingPolicy::FixedSize {
                chunk_size: parse_var(&lookup, "DOCCHAT_CHUNK_SIZE")?.unwrap_or(500),
                chunk_overlap: parse_var(&lookup, "DOCCHAT_CHUNK_OVERLAP")?.unwrap_or(50),
            },
            other => {
                return Err(RagError::ConfigError(format!("unknown chunking policy '{other}'")));
            }
        };
        builder = builder.chunking(policy);

        if let Some(count) = parse_var(&lookup, "DOCCHAT_QUERY_COUNT")? {
            builder = builder.query_count(count);
        }
        if let Some(k) = parse_var(&lookup, "DOCCHAT_K_PER_QUERY")? {
            builder = builder.k_per_query(k);
        }
        if let Some(max) = parse_var(&lookup, "DOCCHAT_MAX_RESULTS")? {
            builder = builder.max_results(max);
        }
        if let Some(attempts) = parse_var(&lookup, "DOCCHAT_MAX_ATTEMPTS")? {
            builder = builder.max_attempts(attempts);
        }
        if let Some(size) = parse_var(&lookup, "DOCCHAT_EMBED_BATCH_SIZE")? {
            builder = builder.embed_batch_size(size);
        }

        builder.build()
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| RagError::ConfigError(format!("invalid value '{raw}' for {key}: {e}")))
        })
        .transpose()
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the collection name.
    pub fn collection_name(mut self, name: impl Into<String>) -> Self {
        self.config.collection_name = name.into();
        self
    }

    /// Set the directory collections are stored under.
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    /// Set the chunking policy.
    pub fn chunking(mut self, policy: ChunkingPolicy) -> Self {
        self.config.chunking = policy;
        self
    }

    /// Set the number of expansion queries generated per question.
    pub fn query_count(mut self, count: usize) -> Self {
        self.config.query_count = count;
        self
    }

    /// Set the number of nearest neighbours fetched per query.
    pub fn k_per_query(mut self, k: usize) -> Self {
        self.config.k_per_query = k;
        self
    }

    /// Cap the merged result count.
    pub fn max_results(mut self, max: usize) -> Self {
        self.config.max_results = Some(max);
        self
    }

    /// Set the number of attempts for transient failures.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    /// Replace the whole retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Set the number of texts per embedding request.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - the collection name is empty
    /// - `k_per_query == 0` or `max_results == Some(0)`
    /// - the chunking policy is inconsistent
    /// - `max_attempts == 0` or `embed_batch_size == 0`
    pub fn build(self) -> Result<RagConfig> {
        let config = self.config;
        if config.collection_name.trim().is_empty() {
            return Err(RagError::ConfigError("collection_name must not be empty".to_string()));
        }
        if config.k_per_query == 0 {
            return Err(RagError::ConfigError("k_per_query must be greater than zero".to_string()));
        }
        if config.max_results == Some(0) {
            return Err(RagError::ConfigError("max_results must be greater than zero".to_string()));
        }
        if config.retry.max_attempts == 0 {
            return Err(RagError::ConfigError("max_attempts must be at least one".to_string()));
        }
        if config.embed_batch_size == 0 {
            return Err(RagError::ConfigError(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        config.chunking.validate()?;
        Ok(config)
    }
}
