use super::*;
use crate::store::EmbeddingRecord;
use crate::vector::encode;
use tempfile::TempDir;

async fn store_with_vectors(vectors: &[(&str, Vec<f32>)]) -> (TempDir, Store) {
    let dir = TempDir::new().expect("create temp dir");
    let store = Store::open(dir.path().join("test.db"))
        .await
        .expect("open store");
    store
        .ensure_embeddings_table("embeddings", false, false)
        .await
        .expect("create table");

    let records: Vec<EmbeddingRecord> = vectors
        .iter()
        .map(|(id, v)| EmbeddingRecord {
            id: id.to_string(),
            embedding: encode(v),
            content: None,
            metadata: None,
        })
        .collect();
    store
        .insert_embeddings("embeddings", &records)
        .await
        .expect("insert");

    (dir, store)
}

#[tokio::test]
async fn ranks_by_descending_similarity() {
    // Against the query [1, 0]: "best" scores 1.0, "middle" 0.6, "worst" 0.0.
    let (_dir, store) = store_with_vectors(&[
        ("worst", vec![0.0, 1.0]),
        ("best", vec![1.0, 0.0]),
        ("middle", vec![0.6, 0.8]),
    ])
    .await;

    let matches = find_similar(&store, "embeddings", &[1.0, 0.0], 2)
        .await
        .expect("search");

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].row.get_str("id").expect("id"), "best");
    assert!((matches[0].score - 1.0).abs() < 1e-6);
    assert_eq!(matches[1].row.get_str("id").expect("id"), "middle");
    assert!((matches[1].score - 0.6).abs() < 1e-6);
}

#[tokio::test]
async fn k_is_clamped_to_available_rows() {
    let (_dir, store) = store_with_vectors(&[
        ("a", vec![1.0, 0.0]),
        ("b", vec![0.0, 1.0]),
        ("c", vec![0.5, 0.5]),
    ])
    .await;

    let matches = find_similar(&store, "embeddings", &[1.0, 0.0], 10)
        .await
        .expect("search");
    assert_eq!(matches.len(), 3);
}

#[tokio::test]
async fn ties_keep_scan_order() {
    let (_dir, store) = store_with_vectors(&[
        ("first", vec![2.0, 0.0]),
        ("second", vec![4.0, 0.0]),
    ])
    .await;

    // Cosine similarity ignores magnitude, so both rows score 1.0 and the
    // stable sort must keep insertion order.
    let matches = find_similar(&store, "embeddings", &[1.0, 0.0], 2)
        .await
        .expect("search");
    assert_eq!(matches[0].row.get_str("id").expect("id"), "first");
    assert_eq!(matches[1].row.get_str("id").expect("id"), "second");
}

#[tokio::test]
async fn dimension_mismatch_is_an_integrity_error() {
    let (_dir, store) = store_with_vectors(&[("a", vec![1.0, 0.0, 0.0])]).await;

    let err = find_similar(&store, "embeddings", &[1.0, 0.0, 0.0, 0.0], 1)
        .await
        .expect_err("mismatched dimensions must fail");
    assert!(matches!(err, GenaiError::Integrity(_)), "got: {err}");
    assert!(err.to_string().contains("dimensions"), "got: {err}");
}

#[tokio::test]
async fn projection_synthesizes_score_and_checks_columns() {
    let (_dir, store) = store_with_vectors(&[("a", vec![1.0, 0.0])]).await;
    let matches = find_similar(&store, "embeddings", &[1.0, 0.0], 1)
        .await
        .expect("search");

    let columns = vec!["id".to_string(), "score".to_string()];
    let display = project(&matches[0], &columns).expect("project");
    assert_eq!(display.len(), 2);
    assert_eq!(display["id"], "a");
    assert_eq!(display["score"], matches[0].score.to_string());

    let missing = vec!["nope".to_string()];
    let err = project(&matches[0], &missing).expect_err("unknown column must fail");
    assert!(matches!(err, GenaiError::MissingColumn(_)));
}
