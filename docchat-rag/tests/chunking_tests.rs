//! Semantic and fixed-size chunking behaviour.

mod common;

use std::sync::Arc;

use docchat_rag::document::{PAGE_END_KEY, PAGE_KEY};
use docchat_rag::{
    BreakpointThreshold, Chunker, ChunkingPolicy, EmbeddingProvider, ModelErrorKind, RagConfig,
    RagError, RetryPolicy, SemanticChunker, TextSegment, ThresholdType, chunker_for,
};
use proptest::prelude::*;

use common::{FlakyEmbedder, KeywordEmbedder, PoisonEmbedder};

fn semantic(embedder: Arc<dyn EmbeddingProvider>, percentile: f64) -> SemanticChunker {
    SemanticChunker::new(embedder, BreakpointThreshold::percentile(percentile))
}

fn texts(chunks: &[docchat_rag::Chunk]) -> Vec<&str> {
    chunks.iter().map(|c| c.text.as_str()).collect()
}

const TOPIC_TEXT: &str = "Cats are a pet. The dog is a pet too. The car engine needs fuel. \
                          Fuel makes the car go. The ocean has fish. Fish swim in the ocean.";

#[tokio::test]
async fn zero_percentile_splits_every_sentence() {
    let chunker = semantic(Arc::new(KeywordEmbedder::new()), 0.0);
    let chunks = chunker.chunk(&[TextSegment::new("A. B. C.")]).await.unwrap();
    assert_eq!(texts(&chunks), vec!["A.", "B.", "C."]);
    assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[tokio::test]
async fn boundaries_follow_topic_shifts() {
    let chunker = semantic(Arc::new(KeywordEmbedder::new()), 70.0).with_buffer_size(0);
    let chunks = chunker.chunk(&[TextSegment::new(TOPIC_TEXT)]).await.unwrap();
    assert_eq!(
        texts(&chunks),
        vec![
            "Cats are a pet. The dog is a pet too.",
            "The car engine needs fuel. Fuel makes the car go.",
            "The ocean has fish. Fish swim in the ocean.",
        ]
    );
}

#[tokio::test]
async fn threshold_above_every_distance_yields_one_chunk() {
    let threshold = BreakpointThreshold { threshold_type: ThresholdType::Absolute, amount: 1.5 };
    let chunker = SemanticChunker::new(Arc::new(KeywordEmbedder::new()), threshold);
    let chunks = chunker.chunk(&[TextSegment::new(TOPIC_TEXT)]).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, TOPIC_TEXT);
}

#[tokio::test]
async fn single_sentence_and_empty_input() {
    let embedder = Arc::new(KeywordEmbedder::new());
    let chunker = semantic(embedder.clone(), 70.0);

    let one = chunker.chunk(&[TextSegment::new("  Only one sentence here.  ")]).await.unwrap();
    assert_eq!(texts(&one), vec!["Only one sentence here."]);

    assert!(chunker.chunk(&[]).await.unwrap().is_empty());
    assert!(chunker.chunk(&[TextSegment::new("   \n ")]).await.unwrap().is_empty());
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn chunks_carry_page_metadata() {
    let chunker = semantic(Arc::new(KeywordEmbedder::new()), 100.0);
    let segments = vec![
        TextSegment::new("The cat sleeps.").with_metadata(PAGE_KEY, "0"),
        TextSegment::new("The dog barks.").with_metadata(PAGE_KEY, "1"),
    ];
    let chunks = chunker.chunk(&segments).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].metadata.get(PAGE_KEY).map(String::as_str), Some("0"));
    assert_eq!(chunks[0].metadata.get(PAGE_END_KEY).map(String::as_str), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_the_failing_unit() {
    let poison = Arc::new(PoisonEmbedder::new("boom", ModelErrorKind::Network));
    let chunker = semantic(poison.clone(), 70.0)
        .with_buffer_size(0)
        .with_batch_size(1)
        .with_retry(RetryPolicy::default());
    let segments = vec![
        TextSegment::new("Cats are pets. Dogs too."),
        TextSegment::new("Engines burn. boom goes here. Fine."),
    ];

    let err = chunker.chunk(&segments).await.unwrap_err();
    match err {
        RagError::ChunkingFailed { segment, offset, .. } => {
            assert_eq!((segment, offset), (1, 14));
        }
        other => panic!("expected ChunkingFailed, got {other}"),
    }
    // Three good batches, then three attempts at the poisoned one.
    assert_eq!(poison.calls(), 6);
}

#[tokio::test]
async fn failing_unit_is_located_inside_a_large_batch() {
    let poison = Arc::new(PoisonEmbedder::new("boom", ModelErrorKind::Network));
    let chunker =
        semantic(poison.clone(), 70.0).with_buffer_size(0).with_retry(RetryPolicy::no_retry());
    let segments = vec![
        TextSegment::new("Cats are pets. Dogs too."),
        TextSegment::new("Engines burn. boom goes here. Fine."),
    ];

    let err = chunker.chunk(&segments).await.unwrap_err();
    assert!(matches!(err, RagError::ChunkingFailed { segment: 1, offset: 14, .. }), "{err}");
    // One failed batch, then single embeds up to and including the poisoned unit.
    assert_eq!(poison.calls(), 5);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let poison = Arc::new(PoisonEmbedder::new("boom", ModelErrorKind::Auth));
    let chunker = semantic(poison.clone(), 70.0).with_buffer_size(0).with_batch_size(1);
    let err = chunker.chunk(&[TextSegment::new("One. boom. Three.")]).await.unwrap_err();
    assert!(matches!(err, RagError::ChunkingFailed { segment: 0, offset: 5, .. }), "{err}");
    assert_eq!(poison.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_transparently() {
    let chunker = semantic(Arc::new(FlakyEmbedder::new(2)), 0.0);
    let chunks = chunker.chunk(&[TextSegment::new("A. B. C.")]).await.unwrap();
    assert_eq!(chunks.len(), 3);
}

#[tokio::test]
async fn configured_policy_selects_the_chunker() {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(KeywordEmbedder::new());

    let fixed = RagConfig::builder().chunking(ChunkingPolicy::fixed_size()).build().unwrap();
    assert_eq!(chunker_for(&fixed, embedder.clone()).name(), "fixed_size");

    let semantic = RagConfig::default();
    assert_eq!(chunker_for(&semantic, embedder).name(), "semantic");
}

const WORDS: [&str; 12] =
    ["cat", "dog", "pet", "engine", "car", "fuel", "ocean", "fish", "the", "is", "big", "old"];

fn arb_text() -> impl Strategy<Value = String> {
    let sentence = proptest::collection::vec(proptest::sample::select(&WORDS[..]), 1..5)
        .prop_map(|words| format!("{}.", words.join(" ")));
    proptest::collection::vec(sentence, 1..12).prop_map(|sentences| sentences.join(" "))
}

fn chunk_blocking(text: &str, percentile: f64, buffer_size: usize) -> Vec<docchat_rag::Chunk> {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        semantic(Arc::new(KeywordEmbedder::new()), percentile)
            .with_buffer_size(buffer_size)
            .chunk(&[TextSegment::new(text)])
            .await
            .unwrap()
    })
}

/// Chunks partition the input: rejoined in order they reproduce it, none is
/// empty, and indices run from zero without gaps.
mod prop_semantic_partition {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn chunks_rejoin_to_the_input(
            text in arb_text(),
            percentile in 0.0f64..=100.0,
            buffer_size in 0usize..3,
        ) {
            let chunks = chunk_blocking(&text, percentile, buffer_size);
            prop_assert!(!chunks.is_empty());
            prop_assert!(chunks.iter().all(|c| !c.text.is_empty()));
            prop_assert_eq!(texts(&chunks).join(" "), text);
            for (position, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, position);
            }
        }
    }
}

/// Lowering the percentile never reduces the number of chunks.
mod prop_semantic_monotonic {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn lower_percentile_gives_at_least_as_many_chunks(
            text in arb_text(),
            a in 0.0f64..=100.0,
            b in 0.0f64..=100.0,
        ) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let many = chunk_blocking(&text, low, 1).len();
            let few = chunk_blocking(&text, high, 1).len();
            prop_assert!(many >= few, "p{low} gave {many} chunks, p{high} gave {few}");
        }
    }
}
