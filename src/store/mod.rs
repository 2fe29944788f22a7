
use std::fmt;
use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Pool, Row as _, Sqlite, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::{GenaiError, Result};

pub type DbPool = Pool<Sqlite>;

/// SQLite-backed store for embedding tables.
///
/// The pool is capped at a single connection: `ATTACH DATABASE` is
/// per-connection state, and all work within one command invocation is
/// sequential anyway.
#[derive(Debug, Clone)]
pub struct Store {
    pool: DbPool,
}

/// One embedding row ready for insertion. The vector is already encoded to
/// its blob form; `content` and `metadata` are present only when the
/// corresponding columns were requested.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub embedding: Vec<u8>,
    pub content: Option<String>,
    pub metadata: Option<String>,
}

/// A single SQLite value, preserving the storage class it arrived with.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "NULL",
            SqlValue::Integer(_) => "INTEGER",
            SqlValue::Real(_) => "REAL",
            SqlValue::Text(_) => "TEXT",
            SqlValue::Blob(_) => "BLOB",
        }
    }
}

/// Text rendering used when query results are concatenated into embedding
/// input. NULL renders as the empty string; blobs are decoded as UTF-8,
/// replacing invalid sequences.
impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => Ok(()),
            SqlValue::Integer(i) => write!(f, "{i}"),
            SqlValue::Real(r) => write!(f, "{r}"),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Blob(b) => f.write_str(&String::from_utf8_lossy(b)),
        }
    }
}

/// One row scanned from the store, with columns in result order.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    columns: Vec<(String, SqlValue)>,
}

impl StoredRow {
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column values in result order.
    #[inline]
    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.columns.iter().map(|(_, v)| v)
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn require(&self, name: &str) -> Result<&SqlValue> {
        self.get(name)
            .ok_or_else(|| GenaiError::MissingColumn(name.to_string()))
    }

    #[inline]
    pub fn get_str(&self, name: &str) -> Result<&str> {
        match self.require(name)? {
            SqlValue::Text(s) => Ok(s),
            other => Err(GenaiError::TypeMismatch {
                column: name.to_string(),
                expected: "TEXT",
                actual: other.type_name(),
            }),
        }
    }

    #[inline]
    pub fn get_blob(&self, name: &str) -> Result<&[u8]> {
        match self.require(name)? {
            SqlValue::Blob(b) => Ok(b),
            other => Err(GenaiError::TypeMismatch {
                column: name.to_string(),
                expected: "BLOB",
                actual: other.type_name(),
            }),
        }
    }
}

impl Store {
    /// Open the store at `path`, creating the file when missing.
    #[inline]
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                GenaiError::Store(format!(
                    "Failed to open store at {}: {e}",
                    path.as_ref().display()
                ))
            })?;

        debug!("Opened store at {}", path.as_ref().display());
        Ok(Self { pool })
    }

    /// Release the connection. Called at the end of a command; dropping the
    /// pool would release it too, but an explicit close keeps shutdown
    /// deterministic.
    #[inline]
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Attach a second store file under `alias` so queries can read from it.
    #[inline]
    pub async fn attach(&self, path: &Path, alias: &str) -> Result<()> {
        validate_identifier(alias, "attach alias")?;

        let stmt = format!("ATTACH DATABASE ?1 AS {alias}");
        sqlx::query(&stmt)
            .bind(path.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                GenaiError::Store(format!("Failed to attach {}: {e}", path.display()))
            })?;

        info!("Attached {} as {}", path.display(), alias);
        Ok(())
    }

    /// Create the embeddings table when absent: `id` (primary key) and
    /// `embedding`, then `content` and `metadata` when requested, in that
    /// fixed order.
    #[inline]
    pub async fn ensure_embeddings_table(
        &self,
        table: &str,
        with_content: bool,
        with_metadata: bool,
    ) -> Result<()> {
        validate_identifier(table, "table name")?;

        let mut columns = vec!["id TEXT PRIMARY KEY", "embedding BLOB"];
        if with_content {
            columns.push("content TEXT");
        }
        if with_metadata {
            columns.push("metadata TEXT");
        }

        let stmt = format!("CREATE TABLE IF NOT EXISTS {table} ({})", columns.join(", "));
        sqlx::query(&stmt)
            .execute(&self.pool)
            .await
            .map_err(|e| GenaiError::Store(format!("Failed to create table {table}: {e}")))?;

        debug!("Ensured table {} ({} columns)", table, columns.len());
        Ok(())
    }

    /// Insert embedding rows inside a single transaction. Either every row
    /// lands or none does; a duplicate id rolls the whole run back.
    #[inline]
    pub async fn insert_embeddings(&self, table: &str, records: &[EmbeddingRecord]) -> Result<()> {
        validate_identifier(table, "table name")?;

        let Some(first) = records.first() else {
            return Ok(());
        };

        let mut columns = vec!["id", "embedding"];
        if first.content.is_some() {
            columns.push("content");
        }
        if first.metadata.is_some() {
            columns.push("metadata");
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let stmt = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GenaiError::Store(format!("Failed to begin transaction: {e}")))?;

        for record in records {
            let mut query = sqlx::query(&stmt)
                .bind(&record.id)
                .bind(&record.embedding);
            if let Some(content) = &record.content {
                query = query.bind(content);
            }
            if let Some(metadata) = &record.metadata {
                query = query.bind(metadata);
            }

            query.execute(&mut *tx).await.map_err(|e| {
                GenaiError::Store(format!("Failed to insert embedding '{}': {e}", record.id))
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| GenaiError::Store(format!("Failed to commit inserts: {e}")))?;

        info!("Inserted {} embeddings into {}", records.len(), table);
        Ok(())
    }

    /// Run an arbitrary read query, capturing every column of every row as a
    /// typed [`SqlValue`].
    #[inline]
    pub async fn query_rows(&self, sql: &str) -> Result<Vec<StoredRow>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| GenaiError::Store(format!("Query failed: {e}")))?;

        rows.iter().map(stored_row).collect()
    }

    /// Read every row of `table`, all columns.
    #[inline]
    pub async fn scan_table(&self, table: &str) -> Result<Vec<StoredRow>> {
        validate_identifier(table, "table name")?;
        self.query_rows(&format!("SELECT * FROM {table}")).await
    }
}

/// Table and attach names are interpolated into SQL text, so they are held
/// to plain identifier syntax.
fn validate_identifier(name: &str, what: &str) -> Result<()> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(GenaiError::Config(format!(
            "invalid {what}: '{name}' (expected a plain SQL identifier)"
        )))
    }
}

fn stored_row(row: &SqliteRow) -> Result<StoredRow> {
    let mut columns = Vec::with_capacity(row.len());
    for (i, col) in row.columns().iter().enumerate() {
        columns.push((col.name().to_string(), value_at(row, i)?));
    }
    Ok(StoredRow { columns })
}

/// SQLite is dynamically typed per value, so the storage class of the value
/// itself (not the declared column type) decides how it is decoded.
fn value_at(row: &SqliteRow, index: usize) -> Result<SqlValue> {
    let (is_null, type_name) = {
        let raw = row
            .try_get_raw(index)
            .map_err(|e| GenaiError::Store(format!("Failed to read column {index}: {e}")))?;
        (raw.is_null(), raw.type_info().name().to_owned())
    };

    if is_null {
        return Ok(SqlValue::Null);
    }

    let decode_err =
        |e: sqlx::Error| GenaiError::Store(format!("Failed to decode column {index}: {e}"));

    let value = match type_name.as_str() {
        "INTEGER" => SqlValue::Integer(row.try_get(index).map_err(decode_err)?),
        "REAL" => SqlValue::Real(row.try_get(index).map_err(decode_err)?),
        "BLOB" => SqlValue::Blob(row.try_get(index).map_err(decode_err)?),
        _ => SqlValue::Text(row.try_get(index).map_err(decode_err)?),
    };
    Ok(value)
}
