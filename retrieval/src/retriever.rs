//! Multi-channel candidate retrieval.
//!
//! Every facet of a [`QueryPlan`] is sent through three channels against one
//! snapshot of the source:
//!
//! - **dense**: chunk k-NN by the facet vector;
//! - **sparse**: lexical scoring of chunk texts by the facet query;
//! - **parent**: block search, each hit block expanded to its chunks.
//!
//! A channel that cannot run degrades to no candidates and says why in its
//! [`ChannelReport`]. Only an unknown source is an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use evidence_hierarchy::{
    BlockId, ChunkId, Collection, HierarchicalIndex, IndexedSource, RetrievalHit, SearchQuery,
};

use crate::error::Result;
use crate::planner::{Facet, QueryPlan};
use crate::router::{Channel, RouterConfig};

/// Configuration for the retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub dense_enabled: bool,
    pub sparse_enabled: bool,
    pub parent_enabled: bool,

    /// Multiplier applied to block scores when expanded to chunks.
    pub parent_discount: f32,

    pub router: RouterConfig,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            dense_enabled: true,
            sparse_enabled: true,
            parent_enabled: true,
            parent_discount: 0.8,
            router: RouterConfig::default(),
        }
    }
}

/// A chunk found for a facet through one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub chunk_id: ChunkId,
    pub block_id: BlockId,
    pub facet_id: String,
    pub channel: Channel,

    /// Channel score in `[0, 1]`.
    pub score: f32,

    pub text: String,

    /// (block position, chunk position).
    pub position: (usize, usize),
}

/// How a channel fared for one facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelStatus {
    Ok { candidates: usize },
    Unavailable { reason: String },
    Disabled,
}

/// Outcome of one channel for one facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub facet_id: String,
    pub channel: Channel,
    pub status: ChannelStatus,
}

/// Candidates for every facet of a plan, with the snapshot they came from.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub source_id: String,
    pub snapshot: Arc<IndexedSource>,
    pub candidates: Vec<RetrievalCandidate>,
    pub reports: Vec<ChannelReport>,
}

impl RetrievalResult {
    /// Whether any channel returned nothing because it could not run.
    pub fn degraded(&self) -> bool {
        self.reports
            .iter()
            .any(|r| !matches!(r.status, ChannelStatus::Ok { .. }))
    }
}

/// Runs the dense, sparse and parent channels for every facet.
pub struct MultiChannelRetriever {
    index: Arc<HierarchicalIndex>,
    config: RetrieverConfig,
}

impl MultiChannelRetriever {
    pub fn new(index: Arc<HierarchicalIndex>, config: RetrieverConfig) -> Self {
        Self { index, config }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Retrieve candidates for `plan` from the current version of `source_id`.
    pub async fn retrieve(&self, source_id: &str, plan: &QueryPlan) -> Result<RetrievalResult> {
        let snapshot = self.index.snapshot(source_id).await?;
        let mut candidates = Vec::new();
        let mut reports = Vec::new();

        for facet in &plan.facets {
            let (dense, sparse, parent) = tokio::join!(
                self.dense(&snapshot, facet, plan.recommended.chunks),
                self.sparse(&snapshot, facet, (plan.recommended.chunks / 2).max(1)),
                self.parent(&snapshot, facet, plan.recommended.blocks),
            );

            for (channel, outcome) in [
                (Channel::Dense, dense),
                (Channel::Sparse, sparse),
                (Channel::Parent, parent),
            ] {
                let status = match outcome {
                    Outcome::Found(found) => {
                        let status = ChannelStatus::Ok {
                            candidates: found.len(),
                        };
                        candidates.extend(found);
                        status
                    }
                    Outcome::Unavailable(reason) => {
                        warn!(
                            "{} channel unavailable for {}: {reason}",
                            channel.as_str(),
                            facet.id
                        );
                        ChannelStatus::Unavailable { reason }
                    }
                    Outcome::Disabled => ChannelStatus::Disabled,
                };
                reports.push(ChannelReport {
                    facet_id: facet.id.clone(),
                    channel,
                    status,
                });
            }
        }

        debug!(
            "Retrieved {} candidates for topic {} from {source_id} v{}",
            candidates.len(),
            plan.topic_id,
            snapshot.version
        );

        Ok(RetrievalResult {
            source_id: source_id.to_string(),
            snapshot,
            candidates,
            reports,
        })
    }

    async fn dense(&self, snapshot: &IndexedSource, facet: &Facet, k: usize) -> Outcome {
        if !self.config.dense_enabled {
            return Outcome::Disabled;
        }
        let Some(vector) = &facet.vector else {
            return Outcome::Unavailable("facet has no query vector".to_string());
        };

        let query = SearchQuery::Vector(vector.clone());
        match self
            .index
            .search_snapshot(snapshot, Collection::Chunks, &query, k)
            .await
        {
            Ok(hits) => Outcome::Found(
                hits.into_iter()
                    .filter_map(|hit| candidate(facet, Channel::Dense, hit.score.clamp(0.0, 1.0), hit))
                    .collect(),
            ),
            Err(err) => Outcome::Unavailable(err.to_string()),
        }
    }

    async fn sparse(&self, snapshot: &IndexedSource, facet: &Facet, k: usize) -> Outcome {
        if !self.config.sparse_enabled {
            return Outcome::Disabled;
        }
        if facet.query_text.trim().is_empty() {
            return Outcome::Unavailable("facet has no query text".to_string());
        }

        let query = SearchQuery::Text(facet.query_text.clone());
        match self
            .index
            .search_snapshot(snapshot, Collection::Chunks, &query, k)
            .await
        {
            Ok(hits) => {
                let max = hits.first().map_or(0.0, |h| h.score);
                Outcome::Found(
                    hits.into_iter()
                        .filter_map(|hit| {
                            let score = normalized(hit.score, max);
                            candidate(facet, Channel::Sparse, score, hit)
                        })
                        .collect(),
                )
            }
            Err(err) => Outcome::Unavailable(err.to_string()),
        }
    }

    async fn parent(&self, snapshot: &IndexedSource, facet: &Facet, k: usize) -> Outcome {
        if !self.config.parent_enabled {
            return Outcome::Disabled;
        }

        let (query, lexical) = match &facet.vector {
            Some(vector) => (SearchQuery::Vector(vector.clone()), false),
            None if !facet.query_text.trim().is_empty() => {
                (SearchQuery::Text(facet.query_text.clone()), true)
            }
            None => return Outcome::Unavailable("facet has no query".to_string()),
        };

        let hits = match self
            .index
            .search_snapshot(snapshot, Collection::Blocks, &query, k)
            .await
        {
            Ok(hits) => hits,
            Err(err) => return Outcome::Unavailable(err.to_string()),
        };

        let max = hits.first().map_or(0.0, |h| h.score);
        let mut found = Vec::new();
        for hit in hits {
            let block_score = if lexical {
                normalized(hit.score, max)
            } else {
                hit.score.clamp(0.0, 1.0)
            };
            let Some(block) = snapshot.document.block(&hit.block_id) else {
                continue;
            };
            for chunk in &block.chunks {
                found.push(RetrievalCandidate {
                    chunk_id: chunk.id.clone(),
                    block_id: block.id.clone(),
                    facet_id: facet.id.clone(),
                    channel: Channel::Parent,
                    score: block_score * self.config.parent_discount,
                    text: chunk.text.clone(),
                    position: (block.position, chunk.position),
                });
            }
        }
        Outcome::Found(found)
    }
}

enum Outcome {
    Found(Vec<RetrievalCandidate>),
    Unavailable(String),
    Disabled,
}

fn normalized(score: f32, max: f32) -> f32 {
    if max > 0.0 { (score / max).clamp(0.0, 1.0) } else { 0.0 }
}

fn candidate(facet: &Facet, channel: Channel, score: f32, hit: RetrievalHit) -> Option<RetrievalCandidate> {
    let position = hit.position();
    Some(RetrievalCandidate {
        chunk_id: hit.chunk_id?,
        block_id: hit.block_id,
        facet_id: facet.id.clone(),
        channel,
        score,
        text: hit.text,
        position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::TopicDirective;
    use crate::planner::{FacetPlanner, PlannerConfig};
    use evidence_embeddings::{
        EmbeddingError, EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, HashingProvider,
    };
    use evidence_hierarchy::{
        Bm25Scorer, EmbedderConfig, HierarchicalChunker, InMemoryBackend, IndexConfig,
        MultiGranularEmbedder,
    };
    use pretty_assertions::assert_eq;

    const TEXT: &str = "# Ownership\n\nEach value has one owner. Moving a value transfers ownership.\n\n# Borrowing\n\nShared references allow many readers. Mutable references are exclusive.\n\n# Async\n\nFutures are polled by an executor.";

    async fn fixture() -> (Arc<HierarchicalIndex>, FacetPlanner) {
        let provider = Arc::new(HashingProvider::new(128));
        let index = Arc::new(HierarchicalIndex::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(Bm25Scorer::default()),
            IndexConfig::default(),
        ));
        let document = HierarchicalChunker::default().chunk("guide", TEXT);
        let embeddings = MultiGranularEmbedder::new(provider.clone(), EmbedderConfig::default())
            .embed(&document)
            .await;
        index.add(document, embeddings).await.unwrap();
        (index, FacetPlanner::new(provider, PlannerConfig::default()))
    }

    fn directive() -> TopicDirective {
        TopicDirective::new("t1", "Borrowing").with_must_include(["mutable references"])
    }

    #[tokio::test]
    async fn test_all_channels_report_ok() {
        let (index, planner) = fixture().await;
        let plan = planner.plan(&directive()).await;
        let result = MultiChannelRetriever::new(index, RetrieverConfig::default())
            .retrieve("guide", &plan)
            .await
            .unwrap();

        assert_eq!(result.reports.len(), plan.facets.len() * 3);
        assert!(!result.degraded());
        assert!(
            result
                .candidates
                .iter()
                .any(|c| c.channel == Channel::Sparse && c.text.contains("Mutable"))
        );
        assert!(result.candidates.iter().all(|c| (0.0..=1.0).contains(&c.score)));
    }

    #[tokio::test]
    async fn test_parent_scores_are_discounted() {
        let (index, planner) = fixture().await;
        let plan = planner.plan(&directive()).await;
        let result = MultiChannelRetriever::new(index, RetrieverConfig::default())
            .retrieve("guide", &plan)
            .await
            .unwrap();

        let parent: Vec<&RetrievalCandidate> = result
            .candidates
            .iter()
            .filter(|c| c.channel == Channel::Parent)
            .collect();
        assert!(!parent.is_empty());
        assert!(parent.iter().all(|c| c.score <= 0.8 + 1e-6));
    }

    #[tokio::test]
    async fn test_disabled_dense_channel_degrades() {
        let (index, planner) = fixture().await;
        let plan = planner.plan(&directive()).await;
        let config = RetrieverConfig {
            dense_enabled: false,
            ..Default::default()
        };
        let result = MultiChannelRetriever::new(index, config)
            .retrieve("guide", &plan)
            .await
            .unwrap();

        assert!(result.degraded());
        assert!(result.candidates.iter().all(|c| c.channel != Channel::Dense));
        assert!(!result.candidates.is_empty());
        assert!(
            result
                .reports
                .iter()
                .filter(|r| r.channel == Channel::Dense)
                .all(|r| r.status == ChannelStatus::Disabled)
        );
    }

    #[tokio::test]
    async fn test_missing_vectors_fall_back_to_text() {
        let (index, planner) = fixture().await;
        let mut plan = planner.plan(&directive()).await;
        for facet in &mut plan.facets {
            facet.vector = None;
        }

        let result = MultiChannelRetriever::new(index, RetrieverConfig::default())
            .retrieve("guide", &plan)
            .await
            .unwrap();

        let dense: Vec<&ChannelReport> = result
            .reports
            .iter()
            .filter(|r| r.channel == Channel::Dense)
            .collect();
        assert!(
            dense
                .iter()
                .all(|r| matches!(r.status, ChannelStatus::Unavailable { .. }))
        );
        assert!(result.candidates.iter().any(|c| c.channel == Channel::Parent));
    }

    /// Refuses any text mentioning "poisoned".
    struct RefusingProvider(HashingProvider);

    #[async_trait::async_trait]
    impl EmbeddingProvider for RefusingProvider {
        fn name(&self) -> &str {
            "refusing"
        }

        fn default_model(&self) -> &str {
            "refusing"
        }

        fn default_dimension(&self) -> usize {
            self.0.default_dimension()
        }

        async fn embed(&self, request: EmbeddingRequest) -> evidence_embeddings::Result<EmbeddingResponse> {
            if request.text.contains("poisoned") {
                return Err(EmbeddingError::ApiRequest("refused".to_string()));
            }
            self.0.embed(request).await
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_unembedded_chunk_is_still_found_lexically() {
        let provider: Arc<dyn EmbeddingProvider> =
            Arc::new(RefusingProvider(HashingProvider::new(128)));
        let index = Arc::new(HierarchicalIndex::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(Bm25Scorer::default()),
            IndexConfig::default(),
        ));
        let document = HierarchicalChunker::default().chunk(
            "guide",
            "# Ownership\n\nEach value has one owner.\n\n# Borrowing\n\nMutable references are exclusive and poisoned.\n\n# Async\n\nFutures are polled by an executor.",
        );
        let refused = document.blocks()[1].chunks[0].id.clone();
        let embeddings = MultiGranularEmbedder::new(Arc::clone(&provider), EmbedderConfig::default())
            .embed(&document)
            .await;
        assert!(!embeddings.is_complete());
        index.add(document, embeddings).await.unwrap();

        let plan = FacetPlanner::new(provider, PlannerConfig::default())
            .plan(&directive())
            .await;
        let result = MultiChannelRetriever::new(index, RetrieverConfig::default())
            .retrieve("guide", &plan)
            .await
            .unwrap();

        let channels: Vec<Channel> = result
            .candidates
            .iter()
            .filter(|c| c.chunk_id == refused)
            .map(|c| c.channel)
            .collect();
        assert!(channels.contains(&Channel::Sparse));
        assert!(!channels.contains(&Channel::Dense));
    }

    #[tokio::test]
    async fn test_unknown_source_is_an_error() {
        let (index, planner) = fixture().await;
        let plan = planner.plan(&directive()).await;
        let err = MultiChannelRetriever::new(index, RetrieverConfig::default())
            .retrieve("missing", &plan)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::RetrievalError::NotIndexed { .. }));
    }
}
