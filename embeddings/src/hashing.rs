//! Heuristic embedding provider based on feature hashing.
//!
//! Each lowercase alphanumeric token is hashed into one of `dimension`
//! buckets with a hash-derived sign, weighted by `1 + ln(tf)`, and the
//! resulting vector is L2-normalized. Texts sharing vocabulary land close
//! together; unrelated texts are near-orthogonal. No model and no network.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::Embedding;
use crate::error::Result;
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};
use crate::similarity::normalize;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Local, deterministic embedding provider.
#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
}

impl HashingProvider {
    /// Create a provider producing vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Embed `text` synchronously.
    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            *counts.entry(token.to_lowercase()).or_default() += 1;
        }

        let mut vector = vec![0.0f32; self.dimension];
        for (token, tf) in counts {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * (1.0 + (tf as f32).ln());
        }

        normalize(&mut vector);
        vector
    }
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(crate::DEFAULT_DIMENSION)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn default_model(&self) -> &str {
        "feature-hashing"
    }

    fn default_dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let embedding = self.embed_text(&request.text);
        Ok(EmbeddingResponse {
            dimension: embedding.len(),
            embedding,
            model: self.default_model().to_string(),
            tokens_used: Some(request.text.split_whitespace().count() as u64),
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}
