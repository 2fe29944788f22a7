#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use tracing::debug;

use crate::store::{Store, StoredRow};
use crate::{GenaiError, Result, vector};

/// A stored row together with its similarity to the query vector.
#[derive(Debug, Clone)]
pub struct SimilarMatch {
    pub row: StoredRow,
    pub score: f32,
}

/// Scan `table` and return the `k` rows most similar to `query`, most
/// similar first. Every stored vector must have the query's dimension; a
/// mismatch means the table was built with a different model and is
/// reported as a data-integrity error. `k` larger than the table is clamped.
///
/// Ordering uses full-precision descending comparison; rows with equal
/// scores keep their scan order.
#[inline]
pub async fn find_similar(
    store: &Store,
    table: &str,
    query: &[f32],
    k: usize,
) -> Result<Vec<SimilarMatch>> {
    let rows = store.scan_table(table).await?;
    debug!("Scanning {} stored embeddings in {}", rows.len(), table);

    let mut matches = Vec::with_capacity(rows.len());
    for row in rows {
        let stored = vector::decode(row.get_blob("embedding")?)?;
        if stored.len() != query.len() {
            return Err(GenaiError::Integrity(format!(
                "stored embedding has {} dimensions but the query has {}",
                stored.len(),
                query.len()
            )));
        }

        let score = vector::cosine_similarity(&stored, query);
        matches.push(SimilarMatch { row, score });
    }

    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches.truncate(k.min(matches.len()));
    Ok(matches)
}

/// Project a match onto the requested display columns. `score` is
/// synthesized from the similarity; every other name must exist in the
/// stored row.
#[inline]
pub fn project(entry: &SimilarMatch, columns: &[String]) -> Result<BTreeMap<String, String>> {
    let mut display = BTreeMap::new();
    for column in columns {
        if column == "score" {
            display.insert(column.clone(), entry.score.to_string());
        } else {
            let value = entry
                .row
                .get(column)
                .ok_or_else(|| GenaiError::MissingColumn(column.clone()))?;
            display.insert(column.clone(), value.to_string());
        }
    }
    Ok(display)
}
