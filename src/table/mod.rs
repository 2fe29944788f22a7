
use std::collections::BTreeMap;
use std::io::Read;

use serde_json::Value;
use tracing::debug;

use crate::{GenaiError, Result};

/// How many leading bytes of the input are inspected when auto-detecting the
/// format.
const DETECT_PREFIX_LEN: usize = 512;

/// The row-oriented text formats [`load_table`] understands. When no format
/// is given, it is auto-detected from the first bytes of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Tsv,
    /// A JSON array of objects.
    Json,
    /// One JSON object per line.
    JsonLines,
}

/// One logical record: a mapping from column name to column value. A sorted
/// map keeps iteration order deterministic, which fixes the order in which
/// downstream consumers concatenate column values.
pub type Row = BTreeMap<String, String>;

/// The data loaded by [`load_table`]. For CSV input such as
///
/// ```text
/// id,name
/// 1,john
/// 2,mary
/// ```
///
/// the loaded table is two rows:
///
/// ```text
/// [0]: {"id": "1", "name": "john"}
/// [1]: {"id": "2", "name": "mary"}
/// ```
///
/// For JSON input the translation is more direct, as the expected shape (an
/// array of objects) maps straight onto this type. Row order always follows
/// input order.
pub type Table = Vec<Row>;

/// Load a table from `reader`. If `format` is `None`, the format is
/// auto-detected by peeking at the first few bytes of the input. Returns the
/// detected format (or the given one) together with the loaded rows.
#[inline]
pub fn load_table<R: Read>(mut reader: R, format: Option<Format>) -> Result<(Format, Table)> {
    let mut input = Vec::new();
    reader.read_to_end(&mut input)?;

    let format = match format {
        Some(f) => f,
        None => {
            let prefix = input.get(..DETECT_PREFIX_LEN).unwrap_or(&input);
            let detected = detect_format(prefix)?;
            debug!("auto-detected input format: {:?}", detected);
            detected
        }
    };

    let table = match format {
        Format::Csv => load_delimited(&input, b',')?,
        Format::Tsv => load_delimited(&input, b'\t')?,
        Format::Json => load_json(&input)?,
        Format::JsonLines => load_json_lines(&input)?,
    };

    Ok((format, table))
}

fn detect_format(prefix: &[u8]) -> Result<Format> {
    let trimmed = prefix.trim_ascii_start();
    if trimmed.starts_with(b"[") {
        return Ok(Format::Json);
    }
    if trimmed.starts_with(b"{") {
        return Ok(Format::JsonLines);
    }

    let Some(newline) = prefix.iter().position(|&b| b == b'\n') else {
        return Err(GenaiError::FormatDetection(
            "no newline within the first 512 bytes".to_string(),
        ));
    };
    let first_line = prefix.get(..newline).unwrap_or(prefix);

    if first_line.contains(&b'\t') {
        Ok(Format::Tsv)
    } else if first_line.contains(&b',') {
        Ok(Format::Csv)
    } else {
        Err(GenaiError::FormatDetection(
            "first line has no delimiter".to_string(),
        ))
    }
}

/// CSV and TSV share a parser; only the delimiter differs. The first record
/// is the header naming the columns, and every data record must have the
/// same number of fields.
fn load_delimited(input: &[u8], delimiter: u8) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::None)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| GenaiError::Parse(e.to_string()))?
        .clone();

    let mut table = Table::new();
    for record in reader.records() {
        let record = record.map_err(|e| GenaiError::Parse(e.to_string()))?;
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(name, field)| (name.to_string(), field.to_string()))
            .collect();
        table.push(row);
    }

    Ok(table)
}

fn load_json(input: &[u8]) -> Result<Table> {
    let decoded: Vec<serde_json::Map<String, Value>> =
        serde_json::from_slice(input).map_err(|e| GenaiError::Parse(e.to_string()))?;

    Ok(decoded.into_iter().map(row_from_object).collect())
}

fn load_json_lines(input: &[u8]) -> Result<Table> {
    let text = std::str::from_utf8(input)
        .map_err(|e| GenaiError::Parse(format!("input is not valid UTF-8: {e}")))?;

    let mut table = Table::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let obj: serde_json::Map<String, Value> =
            serde_json::from_str(line).map_err(|e| GenaiError::Parse(e.to_string()))?;
        table.push(row_from_object(obj));
    }

    Ok(table)
}

/// JSON values are usually typed (numbers, booleans), but the table model is
/// uniformly string-valued, so every scalar is rendered as text. Strings are
/// kept verbatim; anything else keeps its JSON representation.
fn row_from_object(obj: serde_json::Map<String, Value>) -> Row {
    obj.into_iter()
        .map(|(k, v)| {
            let rendered = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, rendered)
        })
        .collect()
}
