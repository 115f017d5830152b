//! Similarity computation for embeddings.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

fn check_dimensions(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical direction
/// - 0.0 means orthogonal vectors (or a zero vector on either side)
/// - -1.0 means opposite vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dimensions(a, b)?;

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot_product / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0))
}

/// Cosine similarity mapped into `[0, 1]`, with mismatched dimensions
/// treated as unrelated.
pub fn unit_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b).map_or(0.0, |sim| sim.max(0.0))
}

/// Compute the dot product between two embeddings.
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dimensions(a, b)?;
    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

/// A similarity search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// ID of the matched item.
    pub id: String,

    /// Similarity score.
    pub score: f32,
}

impl SimilarityResult {
    /// Create a new similarity result.
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Find the top-k most similar embeddings.
///
/// Ties are broken by id so the output is stable for equal scores.
pub fn find_top_k<'a, I>(
    query: &[f32],
    candidates: I,
    k: usize,
    min_score: f32,
) -> Result<Vec<SimilarityResult>>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let mut scores: Vec<(OrderedFloat<f32>, &str)> = Vec::new();

    for (id, embedding) in candidates {
        let score = cosine_similarity(query, embedding)?;
        if score >= min_score {
            scores.push((OrderedFloat(score), id));
        }
    }

    scores.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    Ok(scores
        .into_iter()
        .take(k)
        .map(|(score, id)| SimilarityResult::new(id, score.0))
        .collect())
}

/// Normalize an embedding to unit length.
pub fn normalize(embedding: &mut Embedding) {
    let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in embedding.iter_mut() {
            *x /= magnitude;
        }
    }
}

/// Blend two embeddings as `alpha * a + (1 - alpha) * b`, normalized.
///
/// `alpha` is clamped to `[0, 1]`.
pub fn weighted_blend(a: &[f32], b: &[f32], alpha: f32) -> Result<Embedding> {
    check_dimensions(a, b)?;
    let alpha = alpha.clamp(0.0, 1.0);

    let mut blended: Embedding = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| alpha * x + (1.0 - alpha) * y)
        .collect();
    normalize(&mut blended);
    Ok(blended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_unit_similarity_floors_negative_scores() {
        assert_eq!(unit_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(unit_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &b).is_err());
        assert!(dot_product(&a, &b).is_err());
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_blend_leans_toward_alpha_side() {
        let blended = weighted_blend(&[1.0, 0.0], &[0.0, 1.0], 0.7).unwrap();
        let magnitude: f32 = blended.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-6);
        assert!(blended[0] > blended[1]);
    }

    #[test]
    fn test_find_top_k_orders_and_breaks_ties_by_id() {
        let a = [1.0f32, 0.0];
        let b = [1.0f32, 0.0];
        let c = [0.0f32, 1.0];
        let candidates = vec![("b", &b[..]), ("a", &a[..]), ("c", &c[..])];
        let results = find_top_k(&[1.0, 0.0], candidates, 2, 0.0).unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
