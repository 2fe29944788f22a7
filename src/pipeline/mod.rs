#[cfg(test)]
mod tests;

use std::path::PathBuf;

use tracing::{debug, info};
use walkdir::WalkDir;
use wildmatch::WildMatch;

use crate::store::{EmbeddingRecord, Store};
use crate::table::Table;
use crate::{GenaiError, Result, vector};

/// The embedding half of the model service, kept narrow so the pipeline can
/// run against an in-process implementation in tests.
pub trait Embedder {
    /// Embed a batch of texts, returning one vector per input in input
    /// order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Where the (id, text) pairs to embed come from. The modes are mutually
/// exclusive; the CLI layer enforces that before building a source.
#[derive(Debug, Clone)]
pub enum Source {
    /// A SQL query against the target store itself, optionally with a
    /// second store attached under an alias. The first result column is the
    /// id; the remaining columns are concatenated into the embedded text.
    Sql {
        query: String,
        attach: Option<AttachSpec>,
    },
    /// An explicit list of files; each file's path is the id and its
    /// content the text.
    FileList(Vec<PathBuf>),
    /// A recursive directory walk picking files whose name matches a glob.
    FileTree { root: PathBuf, pattern: String },
    /// Rows loaded by the table loader. Each row must have an `id` column;
    /// the remaining values are concatenated in column-name order.
    Table(Table),
}

#[derive(Debug, Clone)]
pub struct AttachSpec {
    pub alias: String,
    pub path: PathBuf,
}

/// One unit of work for the embedding service.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedInput {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub table: String,
    pub batch_size: usize,
    /// Also store the original text in a `content` column.
    pub store_content: bool,
    /// Constant metadata stored with every row in a `metadata` column.
    pub metadata: Option<String>,
    /// Prefix prepended to every stored id.
    pub id_prefix: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            table: "embeddings".to_string(),
            batch_size: 32,
            store_content: false,
            metadata: None,
            id_prefix: None,
        }
    }
}

/// Gather inputs from `source`, embed them in batches and persist the
/// results. Returns the number of rows written. Nothing is written unless
/// every batch succeeds: the service calls happen first and the inserts run
/// in one transaction.
#[inline]
pub async fn run(
    store: &Store,
    embedder: &dyn Embedder,
    source: Source,
    options: &PipelineOptions,
) -> Result<usize> {
    if options.batch_size == 0 {
        return Err(GenaiError::Config(
            "batch size must be at least 1".to_string(),
        ));
    }

    store
        .ensure_embeddings_table(
            &options.table,
            options.store_content,
            options.metadata.is_some(),
        )
        .await?;

    let inputs = collect_inputs(store, source).await?;
    info!("Found {} values to embed", inputs.len());

    let embeddings = embed_in_batches(embedder, &inputs, options.batch_size)?;

    let records: Vec<EmbeddingRecord> = inputs
        .into_iter()
        .zip(embeddings)
        .map(|(input, embedding)| {
            let id = match &options.id_prefix {
                Some(prefix) => format!("{prefix}{}", input.id),
                None => input.id,
            };
            EmbeddingRecord {
                id,
                embedding: vector::encode(&embedding),
                content: options.store_content.then_some(input.text),
                metadata: options.metadata.clone(),
            }
        })
        .collect();

    info!(
        "Collected {} embeddings; inserting into table {}",
        records.len(),
        options.table
    );
    store.insert_embeddings(&options.table, &records).await?;

    Ok(records.len())
}

/// Resolve a source into (id, text) pairs, preserving source order.
#[inline]
pub async fn collect_inputs(store: &Store, source: Source) -> Result<Vec<EmbedInput>> {
    match source {
        Source::Sql { query, attach } => {
            if let Some(spec) = attach {
                store.attach(&spec.path, &spec.alias).await?;
            }

            let rows = store.query_rows(&query).await?;
            let mut inputs = Vec::with_capacity(rows.len());
            for row in rows {
                if row.len() < 2 {
                    return Err(GenaiError::Config(format!(
                        "expect at least 2 columns from query; got {}",
                        row.len()
                    )));
                }

                let mut values = row.values();
                let id = values.next().map(ToString::to_string).unwrap_or_default();
                let text = values
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                inputs.push(EmbedInput { id, text });
            }
            Ok(inputs)
        }
        Source::FileList(paths) => {
            let mut inputs = Vec::with_capacity(paths.len());
            for path in paths {
                inputs.push(file_input(path)?);
            }
            Ok(inputs)
        }
        Source::FileTree { root, pattern } => {
            if !root.is_dir() {
                return Err(GenaiError::Config(format!(
                    "expect a directory to traverse, got {}",
                    root.display()
                )));
            }

            let matcher = WildMatch::new(&pattern);
            let mut inputs = Vec::new();
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    GenaiError::Io(std::io::Error::other(format!(
                        "error traversing {}: {e}",
                        root.display()
                    )))
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if matcher.matches(&entry.file_name().to_string_lossy()) {
                    inputs.push(file_input(entry.path().to_path_buf())?);
                }
            }
            debug!("Matched {} files under {}", inputs.len(), root.display());
            Ok(inputs)
        }
        Source::Table(table) => {
            let mut inputs = Vec::with_capacity(table.len());
            for row in table {
                let Some(id) = row.get("id").cloned() else {
                    return Err(GenaiError::Parse(format!(
                        "expect input row to have an 'id' column; got columns {:?}",
                        row.keys().collect::<Vec<_>>()
                    )));
                };

                let text = row
                    .iter()
                    .filter(|(k, _)| k.as_str() != "id")
                    .map(|(_, v)| v.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                inputs.push(EmbedInput { id, text });
            }
            Ok(inputs)
        }
    }
}

fn file_input(path: PathBuf) -> Result<EmbedInput> {
    let bytes = std::fs::read(&path)
        .map_err(|e| GenaiError::Io(std::io::Error::other(format!(
            "unable to read {}: {e}",
            path.display()
        ))))?;

    Ok(EmbedInput {
        id: path.display().to_string(),
        text: String::from_utf8_lossy(&bytes).into_owned(),
    })
}

/// Submit the texts in batches of at most `batch_size`, strictly one after
/// the other, and reassemble the vectors in input order. A count mismatch
/// from the service aborts the whole run.
fn embed_in_batches(
    embedder: &dyn Embedder,
    inputs: &[EmbedInput],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let num_batches = inputs.len().div_ceil(batch_size);
    if num_batches > 0 {
        info!("Splitting to {} batches", num_batches);
    }

    let mut embeddings = Vec::with_capacity(inputs.len());
    for (index, chunk) in inputs.chunks(batch_size).enumerate() {
        info!(
            "Embedding batch #{} / {}, size={}",
            index + 1,
            num_batches,
            chunk.len()
        );

        let texts: Vec<String> = chunk.iter().map(|input| input.text.clone()).collect();
        let batch = embedder.embed_batch(&texts)?;

        if batch.len() != chunk.len() {
            return Err(GenaiError::Service(format!(
                "expected {} embeddings for batch {}, got {}",
                chunk.len(),
                index + 1,
                batch.len()
            )));
        }
        embeddings.extend(batch);
    }

    Ok(embeddings)
}
