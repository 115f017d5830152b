//! Embedding cache for repeated texts.
//!
//! Facet queries recur across topics (the same required point, the same
//! topic names), so the engine wraps its provider in a [`CachedProvider`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

#[derive(Debug, Clone)]
struct CacheEntry {
    embedding: Embedding,
    model: String,
    /// Insertion sequence number, used for oldest-first eviction.
    inserted: u64,
}

/// In-memory cache keyed by (text, model).
pub struct EmbeddingCache {
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
    sequence: AtomicU64,
    max_entries: usize,
}

impl EmbeddingCache {
    /// Create a new in-memory cache.
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            sequence: AtomicU64::new(0),
            max_entries: max_entries.max(1),
        }
    }

    fn key(text: &str, model: &str) -> String {
        format!("{model}\u{1f}{text}")
    }

    /// Get an embedding from the cache.
    pub async fn get(&self, text: &str, model: &str) -> Option<Embedding> {
        let cache = self.cache.read().await;
        cache
            .get(&Self::key(text, model))
            .map(|e| e.embedding.clone())
    }

    /// Put an embedding in the cache, evicting the oldest entry when full.
    pub async fn put(&self, text: &str, model: &str, embedding: Embedding) {
        let key = Self::key(text, model);
        let entry = CacheEntry {
            embedding,
            model: model.to_string(),
            inserted: self.sequence.fetch_add(1, Ordering::Relaxed),
        };

        let mut cache = self.cache.write().await;
        if cache.len() >= self.max_entries && !cache.contains_key(&key) {
            if let Some(oldest_key) = cache
                .iter()
                .min_by_key(|(_, v)| v.inserted)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest_key);
            }
        }
        cache.insert(key, entry);
    }

    /// Clear the entire cache.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let cache = self.cache.read().await;
        let mut models: Vec<String> = cache.values().map(|e| e.model.clone()).collect();
        models.sort();
        models.dedup();
        CacheStats {
            entries: cache.len(),
            max_entries: self.max_entries,
            models,
        }
    }
}

/// Statistics about the embedding cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries in cache.
    pub entries: usize,

    /// Maximum cache size.
    pub max_entries: usize,

    /// Models with cached embeddings.
    pub models: Vec<String>,
}

/// A provider wrapper that serves repeated texts from an [`EmbeddingCache`].
pub struct CachedProvider<P> {
    provider: P,
    cache: EmbeddingCache,
}

impl<P: EmbeddingProvider> CachedProvider<P> {
    /// Create a new cached provider.
    pub fn new(provider: P, cache: EmbeddingCache) -> Self {
        Self { provider, cache }
    }

    /// Get the underlying cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedProvider<P> {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn default_model(&self) -> &str {
        self.provider.default_model()
    }

    fn default_dimension(&self) -> usize {
        self.provider.default_dimension()
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string());

        if let Some(embedding) = self.cache.get(&request.text, &model).await {
            debug!("Cache hit for embedding");
            return Ok(EmbeddingResponse {
                dimension: embedding.len(),
                embedding,
                model,
                tokens_used: None,
            });
        }

        let text = request.text.clone();
        let response = self.provider.embed(request).await?;
        self.cache
            .put(&text, &model, response.embedding.clone())
            .await;

        Ok(response)
    }

    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let default_model = self.provider.default_model().to_string();
        let mut responses: Vec<Option<EmbeddingResponse>> = Vec::with_capacity(requests.len());
        let mut misses: Vec<(usize, String, EmbeddingRequest)> = Vec::new();

        for (position, request) in requests.into_iter().enumerate() {
            let model = request
                .model
                .clone()
                .unwrap_or_else(|| default_model.clone());
            match self.cache.get(&request.text, &model).await {
                Some(embedding) => responses.push(Some(EmbeddingResponse {
                    dimension: embedding.len(),
                    embedding,
                    model,
                    tokens_used: None,
                })),
                None => {
                    responses.push(None);
                    misses.push((position, model, request));
                }
            }
        }

        if !misses.is_empty() {
            debug!("Embedding cache: {} misses in batch", misses.len());
            let mut pending = Vec::with_capacity(misses.len());
            let mut slots = Vec::with_capacity(misses.len());
            for (position, model, request) in misses {
                slots.push((position, request.text.clone(), model));
                pending.push(request);
            }

            let fresh = self.provider.embed_batch(pending).await?;
            if fresh.len() != slots.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    slots.len(),
                    fresh.len()
                )));
            }
            for ((position, text, model), response) in slots.into_iter().zip(fresh) {
                self.cache
                    .put(&text, &model, response.embedding.clone())
                    .await;
                responses[position] = Some(response);
            }
        }

        Ok(responses.into_iter().flatten().collect())
    }

    fn is_available(&self) -> bool {
        self.provider.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::HashingProvider;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_cache_put_get() {
        let cache = EmbeddingCache::new(100);
        let embedding = vec![1.0, 2.0, 3.0];

        cache.put("hello", "model-1", embedding.clone()).await;

        assert_eq!(cache.get("hello", "model-1").await, Some(embedding));
        assert_eq!(cache.get("hello", "model-2").await, None);
    }

    #[tokio::test]
    async fn test_cache_eviction_drops_oldest() {
        let cache = EmbeddingCache::new(2);

        cache.put("a", "model", vec![1.0]).await;
        cache.put("b", "model", vec![2.0]).await;
        cache.put("c", "model", vec![3.0]).await;

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(cache.get("a", "model").await, None);
        assert_eq!(cache.get("c", "model").await, Some(vec![3.0]));
    }

    #[tokio::test]
    async fn test_cached_provider_fills_cache() {
        let provider = CachedProvider::new(HashingProvider::new(16), EmbeddingCache::new(10));

        let first = provider.embed(EmbeddingRequest::new("ownership")).await.unwrap();
        let second = provider.embed(EmbeddingRequest::new("ownership")).await.unwrap();

        assert_eq!(first.embedding, second.embedding);
        assert_eq!(provider.cache().stats().await.entries, 1);
    }

    #[tokio::test]
    async fn test_cached_batch_preserves_order() {
        let provider = CachedProvider::new(HashingProvider::new(16), EmbeddingCache::new(10));
        provider.embed(EmbeddingRequest::new("beta")).await.unwrap();

        let batch = provider
            .embed_batch(vec![
                EmbeddingRequest::new("alpha"),
                EmbeddingRequest::new("beta"),
                EmbeddingRequest::new("gamma"),
            ])
            .await
            .unwrap();

        let direct = HashingProvider::new(16);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].embedding, direct.embed_text("alpha"));
        assert_eq!(batch[1].embedding, direct.embed_text("beta"));
        assert_eq!(batch[2].embedding, direct.embed_text("gamma"));
    }
}
