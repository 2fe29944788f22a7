
use crate::{GenaiError, Result};

/// Encode an embedding vector for storage, e.g. as a DB blob. Each component
/// is written as its 4-byte little-endian IEEE-754 representation, in order.
#[inline]
pub fn encode(values: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Decode an embedding vector previously written by [`encode`]. A byte length
/// that is not a multiple of 4 means the blob was truncated or never was an
/// embedding, and is reported rather than silently dropped.
#[inline]
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(GenaiError::Integrity(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    let values = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(values)
}

/// Cosine similarity (magnitude-adjusted dot product) between two vectors of
/// the same length, accumulated in f32. Callers must check lengths first;
/// comparing vectors of different dimensions indicates a model mismatch.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have the same dimension");

    let mut dot = 0f32;
    let mut a_mag = 0f32;
    let mut b_mag = 0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_mag += x * x;
        b_mag += y * y;
    }
    dot / (a_mag.sqrt() * b_mag.sqrt())
}
