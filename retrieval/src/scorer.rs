//! Fusion scoring.
//!
//! Candidates from all facets and channels are merged per chunk and scored
//! on three axes:
//!
//! - relevance: the strongest facet support;
//! - coherence: support for the topic as a whole, minus closeness to
//!   excluded material;
//! - redundancy: closeness to a better candidate (MMR-style).
//!
//! The router-fused channel score enters as a fourth, retrieval term:
//!
//! `final = w_rel * relevance + w_coh * coherence + w_ret * retrieval - w_red * redundancy`.

use std::collections::{BTreeMap, HashMap};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use evidence_embeddings::Embedding;
use evidence_embeddings::similarity::unit_similarity;
use evidence_hierarchy::text::{jaccard, term_overlap};
use evidence_hierarchy::{BlockId, ChunkId, IndexedSource};

use crate::planner::{FacetKind, QueryPlan};
use crate::retriever::RetrievalResult;
use crate::router::{Channel, FacetRouter, RouterConfig};

/// Source of chunk vectors for similarity computations.
pub trait VectorLookup {
    fn chunk_vector(&self, chunk: &ChunkId) -> Option<&Embedding>;
}

impl VectorLookup for IndexedSource {
    fn chunk_vector(&self, chunk: &ChunkId) -> Option<&Embedding> {
        IndexedSource::chunk_vector(self, chunk)
    }
}

impl VectorLookup for HashMap<ChunkId, Embedding> {
    fn chunk_vector(&self, chunk: &ChunkId) -> Option<&Embedding> {
        self.get(chunk)
    }
}

/// Configuration for the fusion scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub relevance_weight: f32,
    pub coherence_weight: f32,
    pub redundancy_weight: f32,

    /// Weight of the router-fused channel score.
    pub retrieval_weight: f32,

    /// Scale of the exclusion penalty inside coherence.
    pub exclusion_weight: f32,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            relevance_weight: 0.5,
            coherence_weight: 0.3,
            redundancy_weight: 0.2,
            retrieval_weight: 0.2,
            exclusion_weight: 0.5,
        }
    }
}

impl ScorerConfig {
    /// Whether every weight is finite and non-negative.
    pub fn is_valid(&self) -> bool {
        [
            self.relevance_weight,
            self.coherence_weight,
            self.redundancy_weight,
            self.retrieval_weight,
            self.exclusion_weight,
        ]
        .iter()
        .all(|w| w.is_finite() && *w >= 0.0)
    }
}

/// A chunk with its fused scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub chunk_id: ChunkId,
    pub block_id: BlockId,
    pub text: String,
    pub position: (usize, usize),

    /// Support per facet id, in `[0, 1]`.
    pub facet_strengths: BTreeMap<String, f32>,

    /// Best raw score per channel across facets.
    pub channel_scores: BTreeMap<Channel, f32>,

    pub dominant_channel: Channel,

    pub relevance: f32,
    pub coherence: f32,
    /// Best router-fused channel score across facets.
    pub retrieval: f32,
    pub redundancy: f32,
    pub final_score: f32,

    #[serde(skip)]
    pub vector: Option<Embedding>,
}

impl ScoredCandidate {
    /// Support for `facet_id`, 0 when unknown.
    pub fn strength(&self, facet_id: &str) -> f32 {
        self.facet_strengths.get(facet_id).copied().unwrap_or(0.0)
    }

    /// Similarity to another candidate: cosine of chunk vectors when both
    /// exist, token Jaccard otherwise.
    pub fn similarity(&self, other: &ScoredCandidate) -> f32 {
        match (&self.vector, &other.vector) {
            (Some(a), Some(b)) => unit_similarity(a, b),
            _ => jaccard(&self.text, &other.text),
        }
    }

    /// Ordering key: final score descending, then document position, then id.
    pub fn rank_key(&self) -> (std::cmp::Reverse<OrderedFloat<f32>>, (usize, usize), &ChunkId) {
        (
            std::cmp::Reverse(OrderedFloat(self.final_score)),
            self.position,
            &self.chunk_id,
        )
    }
}

/// Merges and scores retrieval candidates.
pub struct FusionScorer {
    config: ScorerConfig,
    router: FacetRouter,
}

impl FusionScorer {
    pub fn new(config: ScorerConfig, router: RouterConfig) -> Self {
        Self {
            config,
            router: FacetRouter::new(router),
        }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Score every distinct chunk of `result`, best first.
    pub fn score(
        &self,
        plan: &QueryPlan,
        result: &RetrievalResult,
        vectors: &dyn VectorLookup,
    ) -> Vec<ScoredCandidate> {
        let mut by_chunk: BTreeMap<ChunkId, Pending> = BTreeMap::new();
        for candidate in &result.candidates {
            let pending = by_chunk
                .entry(candidate.chunk_id.clone())
                .or_insert_with(|| Pending {
                    block_id: candidate.block_id.clone(),
                    text: candidate.text.clone(),
                    position: candidate.position,
                    raw: BTreeMap::new(),
                });
            let slot = pending
                .raw
                .entry(candidate.facet_id.clone())
                .or_default()
                .entry(candidate.channel)
                .or_insert(0.0);
            *slot = slot.max(candidate.score);
        }

        let general = plan.general_facet().map(|f| f.id.as_str());
        let mut scored: Vec<ScoredCandidate> = by_chunk
            .into_iter()
            .map(|(chunk_id, pending)| {
                let vector = vectors.chunk_vector(&chunk_id).cloned();

                let mut facet_strengths = BTreeMap::new();
                let mut retrieval: f32 = 0.0;
                for facet in &plan.facets {
                    let fused = pending
                        .raw
                        .get(&facet.id)
                        .map_or(0.0, |raw| self.router.fuse(facet.kind, raw));
                    retrieval = retrieval.max(fused);
                    let strength = match (&vector, &facet.vector) {
                        (Some(chunk), Some(query)) => unit_similarity(chunk, query),
                        _ => fused,
                    };
                    facet_strengths.insert(facet.id.clone(), strength.clamp(0.0, 1.0));
                }

                let mut channel_scores: BTreeMap<Channel, f32> = BTreeMap::new();
                for raw in pending.raw.values() {
                    for (&channel, &score) in raw {
                        let best = channel_scores.entry(channel).or_insert(0.0);
                        *best = best.max(score);
                    }
                }
                let dominant_channel = channel_scores
                    .iter()
                    .max_by(|a, b| {
                        OrderedFloat(*a.1)
                            .cmp(&OrderedFloat(*b.1))
                            .then_with(|| b.0.cmp(a.0))
                    })
                    .map_or(Channel::Dense, |(&channel, _)| channel);

                let relevance = facet_strengths.values().copied().fold(0.0, f32::max);
                let support = general
                    .and_then(|id| facet_strengths.get(id).copied())
                    .unwrap_or(0.0);
                let exclusion = plan
                    .exclusions
                    .iter()
                    .map(|e| match (&vector, &e.vector) {
                        (Some(chunk), Some(excluded)) => unit_similarity(chunk, excluded),
                        _ => term_overlap(&e.text, &pending.text),
                    })
                    .fold(0.0, f32::max);
                let coherence =
                    (support - self.config.exclusion_weight * exclusion).clamp(0.0, 1.0);

                ScoredCandidate {
                    chunk_id,
                    block_id: pending.block_id,
                    text: pending.text,
                    position: pending.position,
                    facet_strengths,
                    channel_scores,
                    dominant_channel,
                    relevance,
                    coherence,
                    retrieval: retrieval.clamp(0.0, 1.0),
                    redundancy: 0.0,
                    final_score: 0.0,
                    vector,
                }
            })
            .collect();

        let pre_score = |c: &ScoredCandidate| {
            self.config.relevance_weight * c.relevance
                + self.config.coherence_weight * c.coherence
                + self.config.retrieval_weight * c.retrieval
        };
        scored.sort_by(|a, b| {
            OrderedFloat(pre_score(b))
                .cmp(&OrderedFloat(pre_score(a)))
                .then_with(|| a.position.cmp(&b.position))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        for i in 0..scored.len() {
            let redundancy = scored[..i]
                .iter()
                .map(|earlier| scored[i].similarity(earlier))
                .fold(0.0, f32::max);
            let candidate = &mut scored[i];
            candidate.redundancy = redundancy;
            candidate.final_score = pre_score(candidate) - self.config.redundancy_weight * redundancy;
        }

        scored.sort_by(|a, b| a.rank_key().cmp(&b.rank_key()));
        debug!("Scored {} candidates for topic {}", scored.len(), plan.topic_id);
        scored
    }
}

struct Pending {
    block_id: BlockId,
    text: String,
    position: (usize, usize),
    /// facet id -> channel -> best raw score.
    raw: BTreeMap<String, BTreeMap<Channel, f32>>,
}
