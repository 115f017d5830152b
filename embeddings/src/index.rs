//! Similarity index for fast embedding lookups.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::{SimilarityResult, find_top_k, normalize};

/// An entry in the similarity index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry<M> {
    /// Unique identifier.
    pub id: String,

    /// The embedding vector (normalized unless disabled).
    pub embedding: Embedding,

    /// Associated metadata.
    pub metadata: M,
}

/// An in-memory similarity index with typed metadata.
///
/// Search is exhaustive cosine similarity over the stored entries, with an
/// optional metadata predicate applied before scoring.
#[derive(Debug, Clone)]
pub struct SimilarityIndex<M> {
    /// Stored entries.
    entries: HashMap<String, IndexEntry<M>>,

    /// Expected dimension of embeddings.
    dimension: usize,

    /// Whether embeddings should be normalized.
    normalize_embeddings: bool,
}

impl<M> SimilarityIndex<M> {
    /// Create a new similarity index.
    pub fn new(dimension: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimension,
            normalize_embeddings: true,
        }
    }

    /// Disable embedding normalization.
    pub fn without_normalization(mut self) -> Self {
        self.normalize_embeddings = false;
        self
    }

    /// Dimension every stored vector must have.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    /// Add or replace an embedding.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        mut embedding: Embedding,
        metadata: M,
    ) -> Result<()> {
        let id = id.into();
        self.check_dimension(embedding.len())?;

        if self.normalize_embeddings {
            normalize(&mut embedding);
        }

        debug!("Added embedding to index: {id}");
        self.entries.insert(
            id.clone(),
            IndexEntry {
                id,
                embedding,
                metadata,
            },
        );

        Ok(())
    }

    /// Remove an embedding from the index.
    pub fn remove(&mut self, id: &str) -> Option<IndexEntry<M>> {
        self.entries.remove(id)
    }

    /// Remove every entry whose metadata matches `predicate`.
    ///
    /// Returns the number of removed entries.
    pub fn remove_where(&mut self, predicate: impl Fn(&M) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !predicate(&entry.metadata));
        before - self.entries.len()
    }

    /// Get an entry by ID.
    pub fn get(&self, id: &str) -> Option<&IndexEntry<M>> {
        self.entries.get(id)
    }

    /// Check if an ID exists in the index.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Search for similar embeddings.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<SimilarityResult>> {
        self.search_filtered(query, k, min_score, |_| true)
    }

    /// Search among the entries whose metadata matches `filter`.
    pub fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
        filter: impl Fn(&M) -> bool,
    ) -> Result<Vec<SimilarityResult>> {
        self.check_dimension(query.len())?;

        let mut query = query.to_vec();
        if self.normalize_embeddings {
            normalize(&mut query);
        }

        let candidates = self
            .entries
            .values()
            .filter(|entry| filter(&entry.metadata))
            .map(|entry| (entry.id.as_str(), entry.embedding.as_slice()));

        find_top_k(&query, candidates, k, min_score)
    }

    /// Get all IDs in the index.
    pub fn ids(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Clear the index.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_index_add_and_get() {
        let mut index = SimilarityIndex::new(3);
        index.add("item1", vec![2.0, 0.0, 0.0], ()).unwrap();

        assert!(index.contains("item1"));
        assert!(!index.contains("item2"));
        assert_eq!(index.get("item1").unwrap().embedding, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_index_search() {
        let mut index = SimilarityIndex::new(3);
        index.add("a", vec![1.0, 0.0, 0.0], ()).unwrap();
        index.add("b", vec![0.0, 1.0, 0.0], ()).unwrap();
        index.add("c", vec![0.7, 0.7, 0.0], ()).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 2, 0.0).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "c");
    }

    #[test]
    fn test_search_filtered_by_metadata() {
        let mut index = SimilarityIndex::new(2);
        index.add("v1", vec![1.0, 0.0], 1u32).unwrap();
        index.add("v2", vec![1.0, 0.1], 2u32).unwrap();

        let results = index
            .search_filtered(&[1.0, 0.0], 5, 0.0, |version| *version == 2)
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "v2");
    }

    #[test]
    fn test_remove_where() {
        let mut index = SimilarityIndex::new(1);
        index.add("a", vec![1.0], "doc-1").unwrap();
        index.add("b", vec![1.0], "doc-1").unwrap();
        index.add("c", vec![1.0], "doc-2").unwrap();

        assert_eq!(index.remove_where(|source| *source == "doc-1"), 2);
        assert_eq!(index.ids(), vec!["c"]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = SimilarityIndex::new(3);
        assert!(index.add("bad", vec![1.0, 0.0], ()).is_err());
        assert!(index.search(&[1.0], 1, 0.0).is_err());
    }
}
