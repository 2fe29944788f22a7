use super::*;
use crate::store::Store;
use crate::table::Row;
use std::cell::RefCell;
use tempfile::TempDir;

/// Deterministic in-process embedder: every text receives `[seq, 1.0]`
/// where `seq` counts inputs across all batches, so tests can verify both
/// batching and global ordering.
struct FakeEmbedder {
    batch_sizes: RefCell<Vec<usize>>,
    counter: RefCell<u32>,
}

impl FakeEmbedder {
    fn new() -> Self {
        Self {
            batch_sizes: RefCell::new(Vec::new()),
            counter: RefCell::new(0),
        }
    }
}

impl Embedder for FakeEmbedder {
    fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        self.batch_sizes.borrow_mut().push(texts.len());

        let mut out = Vec::with_capacity(texts.len());
        for _ in texts {
            let mut counter = self.counter.borrow_mut();
            out.push(vec![*counter as f32, 1.0]);
            *counter += 1;
        }
        Ok(out)
    }
}

/// An embedder that always returns one vector too few.
struct ShortEmbedder;

impl Embedder for ShortEmbedder {
    fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().skip(1).map(|_| vec![0.0]).collect())
    }
}

async fn create_test_store() -> (TempDir, Store) {
    let dir = TempDir::new().expect("create temp dir");
    let store = Store::open(dir.path().join("test.db"))
        .await
        .expect("open store");
    (dir, store)
}

fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn batches_are_sized_and_ordered() {
    let (_dir, store) = create_test_store().await;
    let embedder = FakeEmbedder::new();

    let table: Vec<Row> = (0..75)
        .map(|i| {
            let id = i.to_string();
            row(&[("id", id.as_str()), ("text", "hello")])
        })
        .collect();

    let options = PipelineOptions::default();
    let written = run(&store, &embedder, Source::Table(table), &options)
        .await
        .expect("pipeline runs");

    assert_eq!(written, 75);
    assert_eq!(*embedder.batch_sizes.borrow(), vec![32, 32, 11]);

    // Vectors must land on their original inputs, across batch boundaries.
    let rows = store.scan_table("embeddings").await.expect("scan");
    assert_eq!(rows.len(), 75);
    for (i, stored) in rows.iter().enumerate() {
        assert_eq!(stored.get_str("id").expect("id"), i.to_string());
        let decoded =
            crate::vector::decode(stored.get_blob("embedding").expect("blob")).expect("decode");
        assert_eq!(decoded, vec![i as f32, 1.0]);
    }
}

#[tokio::test]
async fn table_rows_need_an_id_column() {
    let (_dir, store) = create_test_store().await;
    let embedder = FakeEmbedder::new();

    let table = vec![row(&[("name", "joe")])];
    let err = run(
        &store,
        &embedder,
        Source::Table(table),
        &PipelineOptions::default(),
    )
    .await
    .expect_err("row without id must fail");

    assert!(matches!(err, GenaiError::Parse(_)), "got: {err}");
    assert!(err.to_string().contains("'id'"), "got: {err}");
}

#[tokio::test]
async fn table_text_joins_remaining_columns_in_name_order() {
    let (_dir, store) = create_test_store().await;
    let embedder = FakeEmbedder::new();

    let table = vec![row(&[("id", "1"), ("b", "second"), ("a", "first")])];
    let options = PipelineOptions {
        store_content: true,
        ..PipelineOptions::default()
    };
    run(&store, &embedder, Source::Table(table), &options)
        .await
        .expect("pipeline runs");

    let rows = store.scan_table("embeddings").await.expect("scan");
    assert_eq!(rows[0].get_str("content").expect("content"), "first second");
}

#[tokio::test]
async fn sql_source_concatenates_text_columns() {
    let (_dir, store) = create_test_store().await;
    store
        .query_rows("CREATE TABLE src (id INTEGER, t1 TEXT, t2 TEXT)")
        .await
        .expect("create src");
    store
        .query_rows("INSERT INTO src VALUES (1, 'hello', 'world'), (2, 'foo', 'bar')")
        .await
        .expect("seed src");

    let inputs = collect_inputs(
        &store,
        Source::Sql {
            query: "SELECT id, t1, t2 FROM src ORDER BY id".to_string(),
            attach: None,
        },
    )
    .await
    .expect("collect");

    assert_eq!(
        inputs,
        vec![
            EmbedInput {
                id: "1".to_string(),
                text: "hello world".to_string()
            },
            EmbedInput {
                id: "2".to_string(),
                text: "foo bar".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn sql_source_requires_two_columns() {
    let (_dir, store) = create_test_store().await;
    store
        .query_rows("CREATE TABLE src (id INTEGER)")
        .await
        .expect("create src");
    store
        .query_rows("INSERT INTO src VALUES (1)")
        .await
        .expect("seed src");

    let err = collect_inputs(
        &store,
        Source::Sql {
            query: "SELECT id FROM src".to_string(),
            attach: None,
        },
    )
    .await
    .expect_err("single column must fail");

    assert!(matches!(err, GenaiError::Config(_)), "got: {err}");
    assert!(err.to_string().contains("2 columns"), "got: {err}");
}

#[tokio::test]
async fn file_tree_source_matches_glob_recursively() {
    let (_dir, store) = create_test_store().await;

    let tree = TempDir::new().expect("create temp dir");
    std::fs::write(tree.path().join("a.txt"), "alpha").expect("write");
    std::fs::write(tree.path().join("b.md"), "bravo").expect("write");
    std::fs::create_dir(tree.path().join("sub")).expect("mkdir");
    std::fs::write(tree.path().join("sub").join("c.txt"), "charlie").expect("write");

    let inputs = collect_inputs(
        &store,
        Source::FileTree {
            root: tree.path().to_path_buf(),
            pattern: "*.txt".to_string(),
        },
    )
    .await
    .expect("collect");

    let texts: Vec<&str> = inputs.iter().map(|i| i.text.as_str()).collect();
    assert_eq!(texts, vec!["alpha", "charlie"]);
    assert!(inputs[0].id.ends_with("a.txt"));
    assert!(inputs[1].id.ends_with("c.txt"));
}

#[tokio::test]
async fn file_tree_root_must_be_a_directory() {
    let (_dir, store) = create_test_store().await;

    let tree = TempDir::new().expect("create temp dir");
    let file = tree.path().join("plain.txt");
    std::fs::write(&file, "x").expect("write");

    let err = collect_inputs(
        &store,
        Source::FileTree {
            root: file,
            pattern: "*".to_string(),
        },
    )
    .await
    .expect_err("file as root must fail");
    assert!(matches!(err, GenaiError::Config(_)));
}

#[tokio::test]
async fn file_list_source_reads_each_path() {
    let (_dir, store) = create_test_store().await;

    let tree = TempDir::new().expect("create temp dir");
    let first = tree.path().join("one.txt");
    let second = tree.path().join("two.txt");
    std::fs::write(&first, "one").expect("write");
    std::fs::write(&second, "two").expect("write");

    let inputs = collect_inputs(&store, Source::FileList(vec![first.clone(), second]))
        .await
        .expect("collect");
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0].id, first.display().to_string());
    assert_eq!(inputs[0].text, "one");
}

#[tokio::test]
async fn prefix_and_metadata_are_applied() {
    let (_dir, store) = create_test_store().await;
    let embedder = FakeEmbedder::new();

    let table = vec![row(&[("id", "42"), ("text", "hello")])];
    let options = PipelineOptions {
        metadata: Some("run-1".to_string()),
        id_prefix: Some("doc:".to_string()),
        ..PipelineOptions::default()
    };
    run(&store, &embedder, Source::Table(table), &options)
        .await
        .expect("pipeline runs");

    let rows = store.scan_table("embeddings").await.expect("scan");
    assert_eq!(rows[0].get_str("id").expect("id"), "doc:42");
    assert_eq!(rows[0].get_str("metadata").expect("metadata"), "run-1");
}

#[tokio::test]
async fn short_service_response_aborts_without_writing() {
    let (_dir, store) = create_test_store().await;

    let table = vec![
        row(&[("id", "1"), ("text", "a")]),
        row(&[("id", "2"), ("text", "b")]),
    ];
    let err = run(
        &store,
        &ShortEmbedder,
        Source::Table(table),
        &PipelineOptions::default(),
    )
    .await
    .expect_err("count mismatch must fail");
    assert!(matches!(err, GenaiError::Service(_)), "got: {err}");

    let rows = store.scan_table("embeddings").await.expect("scan");
    assert!(rows.is_empty(), "no rows may be written on failure");
}

#[tokio::test]
async fn zero_batch_size_is_a_configuration_error() {
    let (_dir, store) = create_test_store().await;
    let options = PipelineOptions {
        batch_size: 0,
        ..PipelineOptions::default()
    };

    let err = run(
        &store,
        &FakeEmbedder::new(),
        Source::Table(Vec::new()),
        &options,
    )
    .await
    .expect_err("zero batch size must fail");
    assert!(matches!(err, GenaiError::Config(_)));
}
