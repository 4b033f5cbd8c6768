//! Multi-query retrieval.
//!
//! A question is rephrased by the language model into several alternative
//! queries, each query is searched independently, and the hits are merged
//! into one ranked, deduplicated result.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::llm::LanguageModel;
use crate::retry::RetryPolicy;

/// The merged hits of a multi-query retrieval.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    /// Chunks ranked best first, each at most once.
    pub results: Vec<SearchResult>,
    /// Queries that were searched; the original question comes first.
    pub queries: Vec<String>,
    /// Why expansion failed, when only the original question was searched.
    pub degraded: Option<String>,
}

impl RetrievalResult {
    /// Whether retrieval ran with reduced recall.
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Expands a question into several queries and merges their nearest neighbours.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::MultiQueryRetriever;
///
/// let retriever = MultiQueryRetriever::new(embedder, llm).with_query_count(3).with_k_per_query(3);
/// let result = retriever.retrieve("What is the main topic?", &index).await?;
/// ```
pub struct MultiQueryRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    query_count: usize,
    k_per_query: usize,
    max_results: Option<usize>,
    retry: RetryPolicy,
}

impl MultiQueryRetriever {
    /// Create a retriever with three expansions and three hits per query.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            embedder,
            llm,
            query_count: 3,
            k_per_query: 3,
            max_results: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Create a retriever using the counts and retry policy of `config`.
    pub fn from_config(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            query_count: config.query_count,
            k_per_query: config.k_per_query,
            max_results: config.max_results,
            retry: config.retry,
            ..Self::new(embedder, llm)
        }
    }

    /// Set the number of alternative queries requested from the model.
    pub fn with_query_count(mut self, count: usize) -> Self {
        self.query_count = count;
        self
    }

    /// Set the number of hits fetched per query.
    pub fn with_k_per_query(mut self, k: usize) -> Self {
        self.k_per_query = k;
        self
    }

    /// Cap the merged result count.
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Set the retry policy for model and embedding calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Retrieve chunks relevant to `question`.
    ///
    /// Failure to expand the question never fails retrieval: the original
    /// question is searched alone and the result is marked degraded.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding a query or searching the index fails.
    pub async fn retrieve(&self, question: &str, index: &VectorIndex) -> Result<RetrievalResult> {
        let (expansions, degraded) = match self.expand(question).await {
            Ok(expansions) => (expansions, None),
            Err(e) => {
                let degraded = RagError::RetrievalDegraded(e.to_string());
                warn!(
                    error = %degraded,
                    "query expansion failed, searching with the original question only"
                );
                (Vec::new(), Some(e.to_string()))
            }
        };

        let mut queries = Vec::with_capacity(expansions.len() + 1);
        queries.push(question.to_string());
        queries.extend(expansions);

        let mut best: HashMap<String, SearchResult> = HashMap::new();
        for query in &queries {
            let vector = self.retry.run("embed_query", || self.embedder.embed(query)).await?;
            for hit in index.search(&vector, self.k_per_query)? {
                match best.get_mut(&hit.chunk.id) {
                    Some(existing) if existing.score >= hit.score => {}
                    Some(existing) => *existing = hit,
                    None => {
                        best.insert(hit.chunk.id.clone(), hit);
                    }
                }
            }
        }

        let mut results: Vec<SearchResult> = best.into_values().collect();
        sort_by_relevance(&mut results);
        if let Some(max) = self.max_results {
            results.truncate(max);
        }

        info!(
            query_count = queries.len(),
            result_count = results.len(),
            degraded = degraded.is_some(),
            "retrieval complete"
        );
        Ok(RetrievalResult { results, queries, degraded })
    }

    /// Ask the model for alternative phrasings of `question`.
    async fn expand(&self, question: &str) -> Result<Vec<String>> {
        if self.query_count == 0 {
            return Ok(Vec::new());
        }
        let prompt = expansion_prompt(question, self.query_count);
        let response = self.retry.run("expand_query", || self.llm.complete(&prompt)).await?;
        let expansions = parse_expansions(&response, question, self.query_count);
        debug!(requested = self.query_count, received = expansions.len(), "query expanded");
        Ok(expansions)
    }
}

/// Best score first; equal scores keep chunk order.
fn sort_by_relevance(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.index.cmp(&b.chunk.index))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

fn expansion_prompt(question: &str, count: usize) -> String {
    format!(
        "You are an AI language model assistant. Your task is to generate {count} different \
         versions of the given user question to retrieve relevant documents from a vector \
         database. By generating multiple perspectives on the user question, your goal is to \
         help the user overcome some of the limitations of distance-based similarity search. \
         Provide these alternative questions separated by newlines.\n\
         Original question: {question}"
    )
}

/// Keep distinct, non-blank lines that differ from the question, up to `limit`.
fn parse_expansions(response: &str, question: &str, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    seen.insert(normalize(question));

    response
        .lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(normalize(line)))
        .take(limit)
        .map(str::to_string)
        .collect()
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Drop bullets and numbering such as `- `, `* `, `1. ` or `2) `.
fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix(['-', '*', '•']) {
        return rest.trim_start();
    }
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(['.', ')']) {
            return rest.trim_start();
        }
    }
    line
}
