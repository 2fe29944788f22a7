#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end embedding pipeline and similarity search, driven by a
// deterministic in-process embedder so no model service is required.

use genai_cli::pipeline::{self, Embedder, PipelineOptions, Source};
use genai_cli::search;
use genai_cli::store::Store;
use genai_cli::table::load_table;
use genai_cli::{GenaiError, Result};
use tempfile::TempDir;

/// Maps text onto a 3-dimensional vector counting 'x' and 'y' occurrences,
/// so similarity orderings are easy to predict.
struct CountingEmbedder;

impl CountingEmbedder {
    fn embed_one(text: &str) -> Vec<f32> {
        let x = text.chars().filter(|&c| c == 'x').count() as f32;
        let y = text.chars().filter(|&c| c == 'y').count() as f32;
        vec![x, y, 1.0]
    }
}

impl Embedder for CountingEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::embed_one(t)).collect())
    }
}

#[tokio::test]
async fn csv_to_store_to_similarity_search() {
    let dir = TempDir::new().expect("create temp dir");
    let store = Store::open(dir.path().join("embeddings.db"))
        .await
        .expect("open store");

    // Load a CSV input the way the CLI would, format auto-detected.
    let csv = "id,text\nxs,xxxx\nmixed,xxyy\nys,yyyy\n";
    let (_, table) = load_table(csv.as_bytes(), None).expect("load csv");

    let options = PipelineOptions {
        store_content: true,
        metadata: Some("integration".to_string()),
        ..PipelineOptions::default()
    };
    let written = pipeline::run(&store, &CountingEmbedder, Source::Table(table), &options)
        .await
        .expect("pipeline runs");
    assert_eq!(written, 3);

    // A query full of 'x' must rank the x-heavy row first, the mixed row
    // second.
    let query = CountingEmbedder::embed_one("xxxx");
    let matches = search::find_similar(&store, "embeddings", &query, 2)
        .await
        .expect("search");

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].row.get_str("id").expect("id"), "xs");
    assert_eq!(matches[1].row.get_str("id").expect("id"), "mixed");
    assert!(matches[0].score > matches[1].score);

    // The stored row carries the original content and metadata, and the
    // projection emits exactly the requested columns.
    assert_eq!(matches[0].row.get_str("content").expect("content"), "xxxx");
    assert_eq!(
        matches[0].row.get_str("metadata").expect("metadata"),
        "integration"
    );

    let columns = vec!["id".to_string(), "score".to_string()];
    let display = search::project(&matches[0], &columns).expect("project");
    let line = serde_json::to_string(&display).expect("encode");
    let parsed: serde_json::Value = serde_json::from_str(&line).expect("round trip");
    assert_eq!(parsed["id"], "xs");
    assert!(parsed["score"].is_string());

    store.close().await;
}

#[tokio::test]
async fn re_embedding_the_same_ids_conflicts() {
    let dir = TempDir::new().expect("create temp dir");
    let store = Store::open(dir.path().join("embeddings.db"))
        .await
        .expect("open store");

    let (_, table) = load_table("id,text\n1,x\n".as_bytes(), None).expect("load csv");
    let options = PipelineOptions::default();

    pipeline::run(
        &store,
        &CountingEmbedder,
        Source::Table(table.clone()),
        &options,
    )
    .await
    .expect("first run");

    let err = pipeline::run(&store, &CountingEmbedder, Source::Table(table), &options)
        .await
        .expect_err("duplicate ids must conflict");
    assert!(matches!(err, GenaiError::Store(_)), "got: {err}");

    store.close().await;
}

#[tokio::test]
async fn search_rejects_vectors_from_a_different_model() {
    let dir = TempDir::new().expect("create temp dir");
    let store = Store::open(dir.path().join("embeddings.db"))
        .await
        .expect("open store");

    let (_, table) = load_table("id,text\n1,x\n".as_bytes(), None).expect("load csv");
    pipeline::run(
        &store,
        &CountingEmbedder,
        Source::Table(table),
        &PipelineOptions::default(),
    )
    .await
    .expect("pipeline runs");

    // Stored vectors are 3-dimensional; a 4-dimensional query means a
    // different embedding model produced it.
    let err = search::find_similar(&store, "embeddings", &[1.0, 0.0, 0.0, 0.0], 1)
        .await
        .expect_err("dimension mismatch must fail");
    assert!(matches!(err, GenaiError::Integrity(_)), "got: {err}");

    store.close().await;
}
