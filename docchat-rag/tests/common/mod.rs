//! Deterministic test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docchat_rag::{
    Chunk, ChunkSource, EmbeddingProvider, LanguageModel, ModelErrorKind, RagError, Result,
    TextStream, VectorIndex,
};

/// Keywords spanning the embedding space, one dimension each.
pub const TOPICS: [&str; 8] = ["cat", "dog", "pet", "engine", "car", "fuel", "ocean", "fish"];

/// Bag-of-keywords vector with a small constant component so it is never zero.
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = TOPICS.iter().map(|k| lower.matches(k).count() as f32).collect();
    vector.push(0.1);
    vector
}

/// Embeds texts by counting topic keywords.
#[derive(Default)]
pub struct KeywordEmbedder {
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(keyword_vector(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        TOPICS.len() + 1
    }

    fn name(&self) -> &str {
        "keywords"
    }
}

fn embedding_failure(kind: ModelErrorKind) -> RagError {
    RagError::EmbeddingError { provider: "test".into(), kind, message: "injected failure".into() }
}

/// Fails every batch containing `marker`.
pub struct PoisonEmbedder {
    pub marker: &'static str,
    pub kind: ModelErrorKind,
    inner: KeywordEmbedder,
}

impl PoisonEmbedder {
    pub fn new(marker: &'static str, kind: ModelErrorKind) -> Self {
        Self { marker, kind, inner: KeywordEmbedder::new() }
    }

    pub fn calls(&self) -> usize {
        self.inner.calls()
    }
}

#[async_trait]
impl EmbeddingProvider for PoisonEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(self.marker) {
            self.inner.calls.fetch_add(1, Ordering::SeqCst);
            return Err(embedding_failure(self.kind));
        }
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains(self.marker)) {
            self.inner.calls.fetch_add(1, Ordering::SeqCst);
            return Err(embedding_failure(self.kind));
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Rate-limits the first `failures` calls, then behaves like [`KeywordEmbedder`].
pub struct FlakyEmbedder {
    failures_left: AtomicUsize,
    inner: KeywordEmbedder,
}

impl FlakyEmbedder {
    pub fn new(failures: usize) -> Self {
        Self { failures_left: AtomicUsize::new(failures), inner: KeywordEmbedder::new() }
    }

    fn should_fail(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.should_fail() {
            return Err(embedding_failure(ModelErrorKind::RateLimited));
        }
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if self.should_fail() {
            return Err(embedding_failure(ModelErrorKind::RateLimited));
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// A language model with canned expansion and answer responses.
///
/// Prompts containing `Original question:` are treated as expansion requests.
pub struct ScriptedLlm {
    expansions: std::result::Result<String, ModelErrorKind>,
    answer: std::result::Result<String, ModelErrorKind>,
    expansion_calls: AtomicUsize,
    answer_calls: AtomicUsize,
    answer_failures_left: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(expansions: &str, answer: &str) -> Self {
        Self::scripted(Ok(expansions.to_string()), Ok(answer.to_string()))
    }

    pub fn failing_expansion(kind: ModelErrorKind, answer: &str) -> Self {
        Self::scripted(Err(kind), Ok(answer.to_string()))
    }

    pub fn failing_answer(expansions: &str, kind: ModelErrorKind) -> Self {
        Self::scripted(Ok(expansions.to_string()), Err(kind))
    }

    /// Rate-limits the first `failures` answer requests, then answers normally.
    pub fn flaky_answer(expansions: &str, failures: usize, answer: &str) -> Self {
        let llm = Self::new(expansions, answer);
        llm.answer_failures_left.store(failures, Ordering::SeqCst);
        llm
    }

    fn scripted(
        expansions: std::result::Result<String, ModelErrorKind>,
        answer: std::result::Result<String, ModelErrorKind>,
    ) -> Self {
        Self {
            expansions,
            answer,
            expansion_calls: AtomicUsize::new(0),
            answer_calls: AtomicUsize::new(0),
            answer_failures_left: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn expansion_calls(&self) -> usize {
        self.expansion_calls.load(Ordering::SeqCst)
    }

    pub fn answer_calls(&self) -> usize {
        self.answer_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn respond(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let scripted = if prompt.contains("Original question:") {
            self.expansion_calls.fetch_add(1, Ordering::SeqCst);
            self.expansions.clone()
        } else {
            self.answer_calls.fetch_add(1, Ordering::SeqCst);
            let rate_limited = self
                .answer_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if rate_limited { Err(ModelErrorKind::RateLimited) } else { self.answer.clone() }
        };
        scripted.map_err(|kind| RagError::ModelError {
            provider: "scripted".into(),
            kind,
            message: "injected failure".into(),
        })
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.respond(prompt)
    }

    /// Streams the answer one word at a time.
    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        let answer = self.respond(prompt)?;
        let fragments: Vec<Result<String>> =
            answer.split_inclusive(' ').map(|w| Ok(w.to_string())).collect();
        Ok(Box::pin(futures::stream::iter(fragments)))
    }
}

/// A chunk source that counts loads and takes a while to answer.
pub struct CountingSource {
    chunks: Vec<Chunk>,
    loads: AtomicUsize,
    delay: Duration,
}

impl CountingSource {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks, loads: AtomicUsize::new(0), delay: Duration::from_millis(20) }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkSource for CountingSource {
    async fn load_chunks(&self) -> Result<Vec<Chunk>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.chunks.clone())
    }
}

/// Chunks about three distinct topics, in order.
pub fn topic_chunks() -> Vec<Chunk> {
    [
        "The cat is a popular pet.",
        "A dog is a loyal pet.",
        "The car engine burns fuel.",
        "Fuel prices affect every car owner.",
        "The ocean is full of fish.",
        "Fish live in the deep ocean.",
    ]
    .iter()
    .enumerate()
    .map(|(i, text)| Chunk::new(i, *text, HashMap::new()))
    .collect()
}

/// Build the topic index under `location`.
pub async fn topic_index(location: &Path) -> Arc<VectorIndex> {
    let index = VectorIndex::build(topic_chunks(), &KeywordEmbedder::new(), location, "sample")
        .await
        .unwrap();
    Arc::new(index)
}
