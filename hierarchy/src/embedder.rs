//! Multi-granular embedding of a [`HierarchicalDocument`].
//!
//! Every chunk and every block is embedded independently through the
//! injected [`EmbeddingProvider`]. Items are sent in batches with bounded
//! concurrency; when a batch fails, its items are retried one by one so a
//! single bad input only costs its own vector.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use evidence_embeddings::similarity::weighted_blend;
use evidence_embeddings::{Embedding, EmbeddingProvider, EmbeddingRequest};

use crate::document::{BlockId, ChunkId, HierarchicalDocument};

/// Configuration for the embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Weight of the chunk vector in the contextualized vector.
    pub alpha: f32,

    /// Whether to compute contextualized vectors.
    pub contextualize: bool,

    /// Prefix chunk texts with their block heading before embedding.
    pub contextual_prefix: bool,

    /// Texts per provider call.
    pub batch_size: usize,

    /// Provider calls in flight at once.
    pub concurrency: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            contextualize: true,
            contextual_prefix: false,
            batch_size: 32,
            concurrency: 8,
        }
    }
}

/// What an embedding belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EmbeddingTarget {
    Chunk(ChunkId),
    Block(BlockId),
}

/// An item that received no vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingFailure {
    pub target: EmbeddingTarget,
    pub reason: String,
}

/// Vectors computed for one document version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentEmbeddings {
    /// Source the document was built from.
    pub source_id: String,

    /// Content hash of the embedded document.
    pub content_hash: String,

    /// Model reported by the provider.
    pub model: String,

    /// Dimension shared by every vector, if any vector was produced.
    pub dimension: Option<usize>,

    /// Chunk-level vectors.
    pub chunks: HashMap<ChunkId, Embedding>,

    /// Block-level vectors.
    pub blocks: HashMap<BlockId, Embedding>,

    /// Normalized blend of chunk and parent block vectors.
    pub contextualized: HashMap<ChunkId, Embedding>,

    /// Items the provider could not embed.
    pub failures: Vec<EmbeddingFailure>,
}

impl DocumentEmbeddings {
    /// Whether `self` was computed for `document`.
    pub fn matches(&self, document: &HierarchicalDocument) -> bool {
        self.source_id == document.source_id && self.content_hash == document.content_hash
    }

    /// Whether every item received a vector.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

type ItemOutcome = (usize, EmbeddingTarget, Result<Embedding, String>);

/// Computes [`DocumentEmbeddings`] through an injected provider.
pub struct MultiGranularEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbedderConfig,
}

impl MultiGranularEmbedder {
    /// Create an embedder.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbedderConfig) -> Self {
        Self { provider, config }
    }

    /// The provider used for every call.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed all chunks and blocks of `document`. Never fails: items that
    /// cannot be embedded are listed in [`DocumentEmbeddings::failures`].
    pub async fn embed(&self, document: &HierarchicalDocument) -> DocumentEmbeddings {
        let mut items: Vec<(usize, EmbeddingTarget, String)> = Vec::new();
        let mut failures = Vec::new();

        let mut push = |target: EmbeddingTarget, text: String| {
            if text.trim().is_empty() {
                failures.push(EmbeddingFailure {
                    target,
                    reason: "empty text".to_string(),
                });
            } else {
                items.push((items.len(), target, text));
            }
        };

        for block in document.blocks() {
            for chunk in &block.chunks {
                let text = match (&block.heading, self.config.contextual_prefix) {
                    (Some(heading), true) => format!("{heading}\n\n{}", chunk.text),
                    _ => chunk.text.clone(),
                };
                push(EmbeddingTarget::Chunk(chunk.id.clone()), text);
            }
            push(EmbeddingTarget::Block(block.id.clone()), block.summary.clone());
        }

        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<(usize, EmbeddingTarget, String)>> = items
            .chunks(batch_size)
            .map(<[_]>::to_vec)
            .collect();

        let mut outcomes: Vec<ItemOutcome> = stream::iter(batches)
            .map(|batch| self.embed_batch(batch))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();
        outcomes.sort_by_key(|(index, _, _)| *index);

        let mut embeddings = DocumentEmbeddings {
            source_id: document.source_id.clone(),
            content_hash: document.content_hash.clone(),
            model: self.provider.default_model().to_string(),
            ..Default::default()
        };

        for (_, target, outcome) in outcomes {
            let vector = match outcome {
                Ok(vector) if vector.is_empty() => Err("provider returned an empty vector".to_string()),
                Ok(vector) => match embeddings.dimension {
                    Some(dimension) if dimension != vector.len() => Err(format!(
                        "dimension {} differs from {dimension}",
                        vector.len()
                    )),
                    _ => {
                        embeddings.dimension = Some(vector.len());
                        Ok(vector)
                    }
                },
                Err(reason) => Err(reason),
            };

            match (target, vector) {
                (EmbeddingTarget::Chunk(id), Ok(vector)) => {
                    embeddings.chunks.insert(id, vector);
                }
                (EmbeddingTarget::Block(id), Ok(vector)) => {
                    embeddings.blocks.insert(id, vector);
                }
                (target, Err(reason)) => failures.push(EmbeddingFailure { target, reason }),
            }
        }

        if self.config.contextualize {
            for chunk in document.chunks() {
                let (Some(chunk_vector), Some(block_vector)) = (
                    embeddings.chunks.get(&chunk.id),
                    embeddings.blocks.get(&chunk.block_id),
                ) else {
                    continue;
                };
                if let Ok(blended) = weighted_blend(chunk_vector, block_vector, self.config.alpha) {
                    embeddings.contextualized.insert(chunk.id.clone(), blended);
                }
            }
        }

        embeddings.failures = failures;
        if embeddings.failures.is_empty() {
            info!(
                "Embedded {}: {} chunks, {} blocks",
                document.source_id,
                embeddings.chunks.len(),
                embeddings.blocks.len()
            );
        } else {
            warn!(
                "Embedded {} with {} failures: {} chunks, {} blocks",
                document.source_id,
                embeddings.failures.len(),
                embeddings.chunks.len(),
                embeddings.blocks.len()
            );
        }

        embeddings
    }

    async fn embed_batch(&self, batch: Vec<(usize, EmbeddingTarget, String)>) -> Vec<ItemOutcome> {
        let requests: Vec<EmbeddingRequest> = batch
            .iter()
            .map(|(_, _, text)| EmbeddingRequest::new(text.clone()))
            .collect();

        match self.provider.embed_batch(requests).await {
            Ok(responses) if responses.len() == batch.len() => batch
                .into_iter()
                .zip(responses)
                .map(|((index, target, _), response)| (index, target, Ok(response.embedding)))
                .collect(),
            outcome => {
                if let Err(err) = outcome {
                    warn!("Batch of {} failed ({err}), retrying items individually", batch.len());
                }
                let mut outcomes = Vec::with_capacity(batch.len());
                for (index, target, text) in batch {
                    let result = self
                        .provider
                        .embed(EmbeddingRequest::new(text))
                        .await
                        .map(|response| response.embedding)
                        .map_err(|err| err.to_string());
                    outcomes.push((index, target, result));
                }
                outcomes
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::HierarchicalChunker;
    use async_trait::async_trait;
    use evidence_embeddings::{EmbeddingError, EmbeddingResponse, HashingProvider};
    use pretty_assertions::assert_eq;

    /// Fails for any text containing "FAIL".
    struct FlakyProvider(HashingProvider);

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn default_model(&self) -> &str {
            "flaky"
        }

        fn default_dimension(&self) -> usize {
            self.0.default_dimension()
        }

        async fn embed(&self, request: EmbeddingRequest) -> evidence_embeddings::Result<EmbeddingResponse> {
            if request.text.contains("FAIL") {
                return Err(EmbeddingError::ApiRequest("refused".to_string()));
            }
            self.0.embed(request).await
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn document() -> HierarchicalDocument {
        HierarchicalChunker::default().chunk(
            "guide",
            "# Ownership\n\nEach value has one owner.\n\n# Borrowing\n\nReferences FAIL sometimes.\n\n# Lifetimes\n\nLifetimes bound references.",
        )
    }

    #[tokio::test]
    async fn test_embeds_every_chunk_and_block() {
        let embedder = MultiGranularEmbedder::new(
            Arc::new(HashingProvider::new(64)),
            EmbedderConfig::default(),
        );
        let doc = document();
        let embeddings = embedder.embed(&doc).await;

        assert!(embeddings.is_complete());
        assert!(embeddings.matches(&doc));
        assert_eq!(embeddings.chunks.len(), doc.chunk_count());
        assert_eq!(embeddings.blocks.len(), doc.block_count());
        assert_eq!(embeddings.contextualized.len(), doc.chunk_count());
        assert_eq!(embeddings.dimension, Some(64));
    }

    #[tokio::test]
    async fn test_failure_only_drops_the_failing_item() {
        let embedder = MultiGranularEmbedder::new(
            Arc::new(FlakyProvider(HashingProvider::new(64))),
            EmbedderConfig::default(),
        );
        let doc = document();
        let embeddings = embedder.embed(&doc).await;

        let failing_chunk = doc.blocks()[1].chunks[0].id.clone();
        let failing_block = doc.blocks()[1].id.clone();
        let failed: Vec<EmbeddingTarget> =
            embeddings.failures.iter().map(|f| f.target.clone()).collect();

        assert_eq!(
            failed,
            vec![
                EmbeddingTarget::Chunk(failing_chunk.clone()),
                EmbeddingTarget::Block(failing_block)
            ]
        );
        assert!(!embeddings.chunks.contains_key(&failing_chunk));
        assert!(!embeddings.contextualized.contains_key(&failing_chunk));
        assert_eq!(embeddings.chunks.len(), doc.chunk_count() - 1);
    }

    #[tokio::test]
    async fn test_contextualized_vector_is_normalized_blend() {
        let embedder = MultiGranularEmbedder::new(
            Arc::new(HashingProvider::new(64)),
            EmbedderConfig {
                alpha: 0.7,
                batch_size: 1,
                ..Default::default()
            },
        );
        let doc = document();
        let embeddings = embedder.embed(&doc).await;

        let chunk = &doc.blocks()[0].chunks[0];
        let expected = weighted_blend(
            &embeddings.chunks[&chunk.id],
            &embeddings.blocks[&chunk.block_id],
            0.7,
        )
        .unwrap();
        assert_eq!(embeddings.contextualized[&chunk.id], expected);
    }

    #[tokio::test]
    async fn test_empty_document_records_failures_without_panicking() {
        let embedder = MultiGranularEmbedder::new(
            Arc::new(HashingProvider::new(8)),
            EmbedderConfig::default(),
        );
        let doc = HierarchicalChunker::default().chunk("empty", "");
        let embeddings = embedder.embed(&doc).await;

        assert!(embeddings.chunks.is_empty());
        assert_eq!(embeddings.failures.len(), 2);
        assert_eq!(embeddings.dimension, None);
    }
}
