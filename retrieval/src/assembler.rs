//! Context assembly.
//!
//! Turns the selected candidates into an [`EvidencePack`]: narrative order,
//! parent excerpts for chunks that cannot stand alone, transition markers
//! between jumps, and gap warnings for facets the selection could not cover.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use evidence_hierarchy::text::prefix_chars;
use evidence_hierarchy::{Block, BlockId, ChunkId, HierarchicalDocument};

use crate::directive::NarrativeOverride;
use crate::evidence::{
    ContextualChunk, CoverageSummary, EvidencePack, FacetSummary, GapSeverity, GapWarning,
    ParentExcerpt,
};
use crate::planner::QueryPlan;
use crate::router::Channel;
use crate::scorer::ScoredCandidate;
use crate::selector::{CoverageResult, CoverageStatus};

/// Marker for a jump into a block without a heading, or within a block.
pub const ELLIPSIS_TRANSITION: &str = "[...]";

/// Resolves the blocks that own selected chunks.
pub trait ParentLookup {
    fn source_id(&self) -> &str;
    fn block(&self, id: &BlockId) -> Option<&Block>;
}

impl ParentLookup for HierarchicalDocument {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn block(&self, id: &BlockId) -> Option<&Block> {
        HierarchicalDocument::block(self, id)
    }
}

/// Configuration for the assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Chunks shorter than this get a parent excerpt.
    pub min_standalone_chars: usize,

    /// Length of a parent excerpt.
    pub excerpt_chars: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            min_standalone_chars: 200,
            excerpt_chars: 300,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Build the evidence pack for the selection in `coverage`.
    pub fn assemble(
        &self,
        plan: &QueryPlan,
        candidates: &[ScoredCandidate],
        coverage: &CoverageResult,
        parents: &dyn ParentLookup,
    ) -> EvidencePack {
        let by_id: HashMap<&ChunkId, &ScoredCandidate> =
            candidates.iter().map(|c| (&c.chunk_id, c)).collect();
        let mut selected: Vec<&ScoredCandidate> = coverage
            .selected
            .iter()
            .filter_map(|id| by_id.get(id).copied())
            .collect();
        order(&mut selected, plan.narrative());

        let mut supported: HashMap<&ChunkId, Vec<String>> = HashMap::new();
        for facet in &coverage.facets {
            for id in &facet.supporting {
                supported.entry(id).or_default().push(facet.facet_id.clone());
            }
        }

        let mut chunks = Vec::with_capacity(selected.len());
        let mut previous: Option<&ScoredCandidate> = None;
        for (rank, candidate) in selected.iter().copied().enumerate() {
            let block = parents.block(&candidate.block_id);
            chunks.push(ContextualChunk {
                chunk_id: candidate.chunk_id.clone(),
                block_id: candidate.block_id.clone(),
                text: candidate.text.clone(),
                heading: block.and_then(|b| b.heading.clone()),
                parent_excerpt: block.and_then(|b| self.excerpt(candidate, b)),
                transition: previous.and_then(|p| transition(p, candidate, parents)),
                narrative_rank: rank,
                position: candidate.position,
                facets: supported.remove(&candidate.chunk_id).unwrap_or_default(),
                final_score: candidate.final_score,
            });
            previous = Some(candidate);
        }

        let mut summary = CoverageSummary {
            overall: coverage.overall,
            diversity: coverage.diversity,
            ..Default::default()
        };
        let mut gaps = Vec::new();
        let mut facet_support = BTreeMap::new();
        for facet in &coverage.facets {
            let description = plan
                .facet(&facet.facet_id)
                .map_or_else(|| facet.facet_id.clone(), |f| f.description.clone());
            match facet.status {
                CoverageStatus::Covered => summary.covered += 1,
                CoverageStatus::Partial => {
                    summary.partial += 1;
                    gaps.push(GapWarning {
                        facet_id: facet.facet_id.clone(),
                        kind: facet.kind,
                        description: description.clone(),
                        severity: GapSeverity::Weak,
                        strength: facet.strength,
                        message: format!(
                            "weak evidence for {} \"{description}\" (strength {:.2})",
                            facet.kind.as_str(),
                            facet.strength
                        ),
                    });
                }
                CoverageStatus::Uncovered => {
                    summary.uncovered += 1;
                    gaps.push(GapWarning {
                        facet_id: facet.facet_id.clone(),
                        kind: facet.kind,
                        description: description.clone(),
                        severity: GapSeverity::Missing,
                        strength: facet.strength,
                        message: format!(
                            "no evidence for {} \"{description}\"",
                            facet.kind.as_str()
                        ),
                    });
                }
            }
            facet_support.insert(facet.facet_id.clone(), facet.supporting.clone());
            summary.facets.push(FacetSummary {
                facet_id: facet.facet_id.clone(),
                kind: facet.kind,
                description,
                status: facet.status,
                strength: facet.strength,
            });
        }

        debug!(
            "Assembled {} chunks for topic {} with {} gaps",
            chunks.len(),
            plan.topic_id,
            gaps.len()
        );

        EvidencePack {
            topic_id: plan.topic_id.clone(),
            topic_name: plan.topic_name.clone(),
            source_id: parents.source_id().to_string(),
            token_estimate: EvidencePack::estimate_tokens(&chunks),
            chunks,
            coverage: summary,
            facet_support,
            gaps,
            channels: Vec::new(),
            assembled_at: Utc::now(),
        }
    }

    fn excerpt(&self, candidate: &ScoredCandidate, block: &Block) -> Option<ParentExcerpt> {
        if block.chunks.len() < 2 {
            return None;
        }
        let short = candidate.text.chars().count() < self.config.min_standalone_chars;
        if !short && candidate.dominant_channel != Channel::Parent {
            return None;
        }

        let text = block.text.trim();
        let prefix = prefix_chars(text, self.config.excerpt_chars);
        let excerpt = if prefix.len() < text.len() {
            format!("{}...", prefix.trim_end())
        } else {
            prefix.to_string()
        };
        Some(ParentExcerpt {
            heading: block.heading.clone(),
            text: excerpt,
        })
    }
}

/// Document order, unless the narrative override says otherwise.
fn order(selected: &mut [&ScoredCandidate], narrative: Option<&NarrativeOverride>) {
    selected.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.chunk_id.cmp(&b.chunk_id)));

    match narrative {
        None => {}
        Some(NarrativeOverride::PrerequisitesFirst { terms }) => {
            let terms: Vec<String> = terms
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            // Stable: each group keeps document order.
            selected.sort_by_key(|c| {
                let text = c.text.to_lowercase();
                !terms.iter().any(|t| text.contains(t.as_str()))
            });
        }
        Some(NarrativeOverride::Explicit { chunk_ids }) => {
            let rank: HashMap<&ChunkId, usize> = chunk_ids
                .iter()
                .enumerate()
                .rev()
                .map(|(i, id)| (id, i))
                .collect();
            selected.sort_by_key(|c| rank.get(&c.chunk_id).copied().unwrap_or(usize::MAX));
        }
    }
}

fn transition(
    previous: &ScoredCandidate,
    current: &ScoredCandidate,
    parents: &dyn ParentLookup,
) -> Option<String> {
    let (prev_block, prev_chunk) = previous.position;
    let (block, chunk) = current.position;

    let same_block = previous.block_id == current.block_id;
    if same_block && chunk == prev_chunk + 1 {
        return None;
    }
    if !same_block && block == prev_block + 1 && chunk == 0 {
        let prev_is_last = parents
            .block(&previous.block_id)
            .is_some_and(|b| prev_chunk + 1 == b.chunks.len());
        if prev_is_last {
            return None;
        }
    }

    let heading = if same_block {
        None
    } else {
        parents
            .block(&current.block_id)
            .and_then(|b| b.heading.as_deref())
            .map(str::trim)
            .filter(|h| !h.is_empty())
    };
    Some(match heading {
        Some(heading) => format!("[{heading}]"),
        None => ELLIPSIS_TRANSITION.to_string(),
    })
}
