//! Vector similarity helpers.
//!
//! Cosine similarity is undefined for zero-norm vectors; those are reported
//! as errors instead of being coerced to a score.

use crate::error::{Error, Result};

/// Euclidean norm of a vector
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Reject vectors that can never take part in a similarity computation
pub fn validate_embedding(v: &[f32]) -> Result<()> {
    if v.is_empty() {
        return Err(Error::EmptyEmbedding);
    }
    let n = norm(v);
    if !n.is_finite() {
        return Err(Error::NonFiniteNorm);
    }
    if n == 0.0 {
        return Err(Error::ZeroNorm);
    }
    Ok(())
}

/// Compute cosine similarity between two vectors
///
/// Returns a value between -1.0 and 1.0, where 1.0 means identical,
/// 0.0 means orthogonal, and -1.0 means opposite.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    validate_embedding(a)?;
    validate_embedding(b)?;

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let similarity = dot_product / (norm(a) * norm(b));

    // Rounding can push identical vectors marginally past 1.0
    Ok(similarity.clamp(-1.0, 1.0))
}

/// Score every candidate against `query` and order them best first.
///
/// Returns `(index, similarity)` pairs. The sort is stable, so candidates
/// with equal scores keep their original order.
pub fn rank<'a, I>(query: &[f32], candidates: I) -> Result<Vec<(usize, f32)>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut scored = candidates
        .into_iter()
        .enumerate()
        .map(|(i, v)| cosine_similarity(query, v).map(|s| (i, s)))
        .collect::<Result<Vec<_>>>()?;
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(scored)
}
