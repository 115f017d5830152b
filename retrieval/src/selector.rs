//! Coverage-driven selection.
//!
//! Instead of taking the top K candidates, the selector walks the facets in
//! priority order and picks, for each one, the best candidate that actually
//! raises its support while staying distinct from what is already selected.
//! Leftover budget is filled by final score.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use evidence_hierarchy::ChunkId;

use crate::planner::{Facet, FacetKind};
use crate::scorer::ScoredCandidate;

/// Weight of each facet kind in the overall coverage score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KindWeights {
    pub must_include: f32,
    pub general_topic: f32,
    pub navigation: f32,
}

impl KindWeights {
    pub fn get(&self, kind: FacetKind) -> f32 {
        match kind {
            FacetKind::MustInclude => self.must_include,
            FacetKind::GeneralTopic => self.general_topic,
            FacetKind::Navigation => self.navigation,
        }
    }
}

impl Default for KindWeights {
    fn default() -> Self {
        Self {
            must_include: 1.5,
            general_topic: 1.0,
            navigation: 0.5,
        }
    }
}

/// Configuration for the coverage selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Facet strength at which a facet counts as covered.
    pub covered_threshold: f32,

    /// Facet strength at which a facet counts as partially covered.
    pub partial_threshold: f32,

    /// Minimum strength for a candidate to be picked for a facet.
    pub min_support: f32,

    /// Maximum similarity between a new pick and any selected candidate.
    pub diversity_threshold: f32,

    /// Picks per facet during the coverage pass.
    pub max_per_facet: usize,

    /// Total budget.
    pub max_selected: usize,

    /// Minimum final score for fill picks.
    pub min_fill_score: f32,

    pub kind_weights: KindWeights,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            covered_threshold: 0.6,
            partial_threshold: 0.3,
            min_support: 0.2,
            diversity_threshold: 0.9,
            max_per_facet: 3,
            max_selected: 8,
            min_fill_score: 0.3,
            kind_weights: KindWeights::default(),
        }
    }
}

/// How well a facet is supported by the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    Covered,
    Partial,
    Uncovered,
}

/// Coverage of one facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetCoverage {
    pub facet_id: String,
    pub kind: FacetKind,
    pub status: CoverageStatus,

    /// Best support among selected candidates.
    pub strength: f32,

    /// Selected candidates supporting the facet at least partially.
    pub supporting: Vec<ChunkId>,
}

/// The outcome of selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageResult {
    /// Selected chunks, in selection order.
    pub selected: Vec<ChunkId>,

    pub facets: Vec<FacetCoverage>,

    /// Kind-weighted mean facet strength.
    pub overall: f32,

    /// One minus the mean pairwise similarity of the selection.
    pub diversity: f32,
}

impl CoverageResult {
    pub fn facet(&self, facet_id: &str) -> Option<&FacetCoverage> {
        self.facets.iter().find(|f| f.facet_id == facet_id)
    }
}

/// Picks a small, diverse set of candidates covering every facet.
#[derive(Debug, Clone, Default)]
pub struct CoverageSelector {
    config: SelectorConfig,
}

impl CoverageSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    fn status(&self, strength: f32) -> CoverageStatus {
        if strength >= self.config.covered_threshold {
            CoverageStatus::Covered
        } else if strength >= self.config.partial_threshold {
            CoverageStatus::Partial
        } else {
            CoverageStatus::Uncovered
        }
    }

    fn passes_guard(&self, candidate: &ScoredCandidate, selected: &[&ScoredCandidate]) -> bool {
        selected
            .iter()
            .all(|s| candidate.similarity(s) <= self.config.diversity_threshold)
    }

    /// Select from `candidates` for `facets`. Deterministic for equal input.
    pub fn select(&self, facets: &[Facet], candidates: &[ScoredCandidate]) -> CoverageResult {
        let mut ranked: Vec<&ScoredCandidate> = candidates.iter().collect();
        ranked.sort_by(|a, b| a.rank_key().cmp(&b.rank_key()));

        let mut ordered: Vec<&Facet> = facets.iter().collect();
        ordered.sort_by_key(|f| f.kind.priority());

        let budget = self.config.max_selected;
        let mut selected: Vec<&ScoredCandidate> = Vec::new();

        for facet in &ordered {
            let mut picks = 0;
            while picks < self.config.max_per_facet && selected.len() < budget {
                let strength = selected
                    .iter()
                    .map(|c| c.strength(&facet.id))
                    .fold(0.0, f32::max);
                if strength >= self.config.covered_threshold {
                    break;
                }

                let pick = ranked.iter().copied().find(|c| {
                    let support = c.strength(&facet.id);
                    support >= self.config.min_support
                        && support > strength
                        && !selected.iter().any(|s| s.chunk_id == c.chunk_id)
                        && self.passes_guard(c, &selected)
                });
                let Some(pick) = pick else {
                    break;
                };
                selected.push(pick);
                picks += 1;
            }
        }

        for candidate in &ranked {
            if selected.len() >= budget {
                break;
            }
            if candidate.final_score >= self.config.min_fill_score
                && !selected.iter().any(|s| s.chunk_id == candidate.chunk_id)
                && self.passes_guard(candidate, &selected)
            {
                selected.push(candidate);
            }
        }

        let coverage: Vec<FacetCoverage> = facets
            .iter()
            .map(|facet| {
                let strength = selected
                    .iter()
                    .map(|c| c.strength(&facet.id))
                    .fold(0.0, f32::max);
                FacetCoverage {
                    facet_id: facet.id.clone(),
                    kind: facet.kind,
                    status: self.status(strength),
                    strength,
                    supporting: selected
                        .iter()
                        .filter(|c| c.strength(&facet.id) >= self.config.partial_threshold)
                        .map(|c| c.chunk_id.clone())
                        .collect(),
                }
            })
            .collect();

        let (weighted, total) = coverage.iter().fold((0.0, 0.0), |(sum, total), f| {
            let weight = self.config.kind_weights.get(f.kind);
            (sum + weight * f.strength, total + weight)
        });
        let overall = if total > 0.0 { weighted / total } else { 0.0 };

        let result = CoverageResult {
            selected: selected.iter().map(|c| c.chunk_id.clone()).collect(),
            facets: coverage,
            overall,
            diversity: diversity(&selected),
        };

        let by_status = result.facets.iter().fold(BTreeMap::new(), |mut counts, f| {
            *counts.entry(format!("{:?}", f.status)).or_insert(0usize) += 1;
            counts
        });
        debug!(
            "Selected {} of {} candidates, overall coverage {:.2}, facets {by_status:?}",
            result.selected.len(),
            candidates.len(),
            result.overall
        );

        result
    }
}

fn diversity(selected: &[&ScoredCandidate]) -> f32 {
    if selected.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0;
    for (i, a) in selected.iter().enumerate() {
        for b in &selected[i + 1..] {
            total += a.similarity(b);
            pairs += 1;
        }
    }
    1.0 - total / pairs as f32
}
