//! Cosine distance and the stable ordering of candidates.

use thiserror::Error;

use crate::types::{Card, FeatureVector, RankedResult};

/// Distance assigned when either side has no magnitude
pub const MAX_DISSIMILAR: f32 = 1.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("Dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

pub type SimilarityResult<T> = Result<T, SimilarityError>;

/// Cosine distance `1 - (a·b)/(‖a‖·‖b‖)`, in `[0, 2]`.
///
/// Both vectors must have the same length. A zero-magnitude vector on
/// either side yields [`MAX_DISSIMILAR`].
pub fn distance(a: &FeatureVector, b: &FeatureVector) -> SimilarityResult<f32> {
    cosine_distance(a.as_slice(), b.as_slice())
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> SimilarityResult<f32> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(MAX_DISSIMILAR);
    }

    // sqrt of the product keeps distance(a, a) at exactly zero
    let similarity = dot / (norm_a * norm_b).sqrt();
    Ok((1.0 - similarity).clamp(0.0, 2.0) as f32)
}

/// Orders `items` by ascending distance to `query`.
///
/// Equal distances keep their input order. Fails on the first item whose
/// vector length differs from the query's.
pub fn rank<I>(query: &FeatureVector, items: I) -> SimilarityResult<Vec<RankedResult>>
where
    I: IntoIterator<Item = (Card, FeatureVector)>,
{
    let mut results = items
        .into_iter()
        .map(|(card, vector)| {
            distance(query, &vector).map(|distance| RankedResult { card, distance })
        })
        .collect::<SimilarityResult<Vec<_>>>()?;

    // sort_by is stable
    results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    Ok(results)
}

/// [`rank`] followed by truncation to `limit` results.
pub fn rank_top<I>(
    query: &FeatureVector,
    items: I,
    limit: Option<usize>,
) -> SimilarityResult<Vec<RankedResult>>
where
    I: IntoIterator<Item = (Card, FeatureVector)>,
{
    let mut results = rank(query, items)?;
    if let Some(limit) = limit {
        results.truncate(limit);
    }
    Ok(results)
}
