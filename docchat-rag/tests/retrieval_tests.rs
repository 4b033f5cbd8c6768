//! Multi-query expansion, merging and degradation.

mod common;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use docchat_rag::{ModelErrorKind, MultiQueryRetriever, RetryPolicy};

use common::{KeywordEmbedder, ScriptedLlm, keyword_vector, topic_index};

fn retriever(llm: Arc<ScriptedLlm>) -> MultiQueryRetriever {
    MultiQueryRetriever::new(Arc::new(KeywordEmbedder::new()), llm)
}

#[tokio::test]
async fn overlapping_queries_keep_each_chunk_once_with_its_best_score() {
    let temp = tempfile::tempdir().unwrap();
    let index = topic_index(temp.path()).await;
    let llm = Arc::new(ScriptedLlm::new("cat pet\ndog pet\nfuel for the car", "unused"));

    let result = retriever(llm.clone()).retrieve("my cat", &index).await.unwrap();

    assert_eq!(result.queries, vec!["my cat", "cat pet", "dog pet", "fuel for the car"]);
    assert!(!result.is_degraded());

    let ids: HashSet<&str> = result.results.iter().map(|r| r.chunk.id.as_str()).collect();
    assert_eq!(ids.len(), result.results.len(), "duplicate chunk in merged result");
    assert!(result.results.len() <= 4 * 3);

    let mut best: HashMap<String, f32> = HashMap::new();
    for query in &result.queries {
        for hit in index.search(&keyword_vector(query), 3).unwrap() {
            let score = best.entry(hit.chunk.id.clone()).or_insert(f32::MIN);
            *score = score.max(hit.score);
        }
    }
    for hit in &result.results {
        assert_eq!(hit.score, best[&hit.chunk.id]);
    }
    for pair in result.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn zero_query_count_searches_only_the_question() {
    let temp = tempfile::tempdir().unwrap();
    let index = topic_index(temp.path()).await;
    let llm = Arc::new(ScriptedLlm::new("should not be used", "unused"));

    let result =
        retriever(llm.clone()).with_query_count(0).retrieve("ocean fish", &index).await.unwrap();

    assert_eq!(llm.expansion_calls(), 0);
    assert_eq!(result.queries, vec!["ocean fish"]);
    assert!(!result.is_degraded());
    assert_eq!(result.results, index.search(&keyword_vector("ocean fish"), 3).unwrap());
}

#[tokio::test]
async fn failed_expansion_degrades_to_the_original_question() {
    let temp = tempfile::tempdir().unwrap();
    let index = topic_index(temp.path()).await;
    let llm = Arc::new(ScriptedLlm::failing_expansion(ModelErrorKind::Auth, "unused"));

    let result = retriever(llm.clone()).retrieve("car engine", &index).await.unwrap();

    assert!(result.is_degraded());
    assert_eq!(result.queries, vec!["car engine"]);
    assert_eq!(result.results[0].chunk.id, "chunk-000002");
    assert_eq!(llm.expansion_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_expansion_is_retried_before_degrading() {
    let temp = tempfile::tempdir().unwrap();
    let index = topic_index(temp.path()).await;
    let llm = Arc::new(ScriptedLlm::failing_expansion(ModelErrorKind::RateLimited, "unused"));

    let result = retriever(llm.clone())
        .with_retry(RetryPolicy::default())
        .retrieve("car engine", &index)
        .await
        .unwrap();

    assert!(result.is_degraded());
    assert_eq!(llm.expansion_calls(), 3);
}

#[tokio::test]
async fn blank_and_repeated_expansions_are_discarded() {
    let temp = tempfile::tempdir().unwrap();
    let index = topic_index(temp.path()).await;
    let llm = Arc::new(ScriptedLlm::new("\n  \n1. Pet cat\n2. pet cat\nMY CAT\n", "unused"));

    let result = retriever(llm).retrieve("my cat", &index).await.unwrap();
    assert_eq!(result.queries, vec!["my cat", "Pet cat"]);
}

#[tokio::test]
async fn merged_results_respect_the_overall_cap() {
    let temp = tempfile::tempdir().unwrap();
    let index = topic_index(temp.path()).await;
    let llm = Arc::new(ScriptedLlm::new("car fuel\nocean fish", "unused"));

    let result = retriever(llm).with_max_results(2).retrieve("pet", &index).await.unwrap();
    assert_eq!(result.results.len(), 2);
    assert!(result.results[0].score >= result.results[1].score);
}
