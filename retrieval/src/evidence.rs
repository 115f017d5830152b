//! The evidence pack handed to downstream writers.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use evidence_hierarchy::{BlockId, ChunkId};

use crate::planner::FacetKind;
use crate::retriever::ChannelReport;
use crate::selector::CoverageStatus;

/// Separator between chunks in [`EvidencePack::render`].
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Heading and leading text of the block a chunk belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentExcerpt {
    pub heading: Option<String>,
    pub text: String,
}

/// A selected chunk with the context it needs to be read on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualChunk {
    pub chunk_id: ChunkId,
    pub block_id: BlockId,
    pub text: String,
    pub heading: Option<String>,
    pub parent_excerpt: Option<ParentExcerpt>,

    /// Marker for a jump from the previous chunk.
    pub transition: Option<String>,

    /// Position in the pack, starting at 0.
    pub narrative_rank: usize,

    /// (block position, chunk position).
    pub position: (usize, usize),

    /// Facets this chunk supports.
    pub facets: Vec<String>,

    pub final_score: f32,
}

impl ContextualChunk {
    fn token_estimate(&self) -> usize {
        let excerpt = self.parent_excerpt.as_ref().map_or(0, |e| e.text.len());
        let transition = self.transition.as_ref().map_or(0, String::len);
        (self.text.len() + excerpt + transition) / 4
    }
}

/// Coverage of one facet, as reported in the pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetSummary {
    pub facet_id: String,
    pub kind: FacetKind,
    pub description: String,
    pub status: CoverageStatus,
    pub strength: f32,
}

/// Coverage figures of the pack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub overall: f32,
    pub diversity: f32,
    pub covered: usize,
    pub partial: usize,
    pub uncovered: usize,
    pub facets: Vec<FacetSummary>,
}

impl CoverageSummary {
    /// Descriptions of the facets with `status`, in facet order.
    pub fn descriptions(&self, status: CoverageStatus) -> Vec<&str> {
        self.facets
            .iter()
            .filter(|f| f.status == status)
            .map(|f| f.description.as_str())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.partial == 0 && self.uncovered == 0
    }
}

/// How badly a facet is under-supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapSeverity {
    /// Partial support only.
    Weak,
    /// No usable support.
    Missing,
}

/// A facet the pack does not fully cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapWarning {
    pub facet_id: String,
    pub kind: FacetKind,
    pub description: String,
    pub severity: GapSeverity,
    pub strength: f32,
    pub message: String,
}

/// Ordered, contextualized evidence for one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePack {
    pub topic_id: String,
    pub topic_name: String,
    pub source_id: String,
    pub chunks: Vec<ContextualChunk>,
    pub coverage: CoverageSummary,

    /// Facet id to the selected chunks supporting it.
    pub facet_support: BTreeMap<String, Vec<ChunkId>>,

    pub gaps: Vec<GapWarning>,

    /// Per-facet channel outcomes from retrieval.
    pub channels: Vec<ChannelReport>,

    pub token_estimate: usize,
    pub assembled_at: DateTime<Utc>,
}

impl EvidencePack {
    /// Whether every facet is covered.
    pub fn is_complete(&self) -> bool {
        self.coverage.is_complete()
    }

    pub fn chunk_ids(&self) -> impl Iterator<Item = &ChunkId> {
        self.chunks.iter().map(|c| &c.chunk_id)
    }

    pub(crate) fn estimate_tokens(chunks: &[ContextualChunk]) -> usize {
        chunks.iter().map(ContextualChunk::token_estimate).sum()
    }

    /// Prompt-ready text form of the pack.
    pub fn render(&self) -> String {
        let title = if self.topic_name.trim().is_empty() {
            &self.topic_id
        } else {
            &self.topic_name
        };
        let mut out = String::new();
        let _ = writeln!(out, "=== Evidence for: {title} ===");
        let _ = writeln!(
            out,
            "({} chunks, ~{} tokens)",
            self.chunks.len(),
            self.token_estimate
        );

        let covered = self.coverage.descriptions(CoverageStatus::Covered);
        if !covered.is_empty() {
            let _ = writeln!(out, "Covered: {}", covered.join(", "));
        }
        let missing: Vec<&str> = self
            .gaps
            .iter()
            .filter(|g| g.severity == GapSeverity::Missing)
            .map(|g| g.description.as_str())
            .collect();
        if !missing.is_empty() {
            let _ = writeln!(out, "Missing: {}", missing.join(", "));
        }
        for gap in self.gaps.iter().filter(|g| g.severity == GapSeverity::Weak) {
            let _ = writeln!(out, "Warning: {}", gap.message);
        }

        let descriptions: BTreeMap<&str, &str> = self
            .coverage
            .facets
            .iter()
            .map(|f| (f.facet_id.as_str(), f.description.as_str()))
            .collect();

        let body: Vec<String> = self
            .chunks
            .iter()
            .map(|chunk| {
                let mut part = String::new();
                if let Some(transition) = &chunk.transition {
                    let _ = writeln!(part, "{transition}");
                }
                if let Some(excerpt) = &chunk.parent_excerpt {
                    match &excerpt.heading {
                        Some(heading) => {
                            let _ = writeln!(part, "[Context: {heading}]");
                        }
                        None => {
                            let _ = writeln!(part, "[Context]");
                        }
                    }
                    let _ = writeln!(part, "{}\n", excerpt.text);
                }
                part.push_str(chunk.text.trim_end());
                let relevant: Vec<&str> = chunk
                    .facets
                    .iter()
                    .map(|id| descriptions.get(id.as_str()).copied().unwrap_or(id.as_str()))
                    .collect();
                if !relevant.is_empty() {
                    let _ = write!(part, "\n[Relevant to: {}]", relevant.join(", "));
                }
                part
            })
            .collect();

        if !body.is_empty() {
            out.push('\n');
            out.push_str(&body.join(CHUNK_SEPARATOR));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(id: &str, text: &str, facets: &[&str]) -> ContextualChunk {
        ContextualChunk {
            chunk_id: ChunkId::from(id),
            block_id: BlockId::from("b"),
            text: text.to_string(),
            heading: None,
            parent_excerpt: None,
            transition: None,
            narrative_rank: 0,
            position: (0, 0),
            facets: facets.iter().map(|f| f.to_string()).collect(),
            final_score: 0.5,
        }
    }

    fn pack(chunks: Vec<ContextualChunk>) -> EvidencePack {
        let facets = vec![
            FacetSummary {
                facet_id: "facet-000".to_string(),
                kind: FacetKind::MustInclude,
                description: "aliasing".to_string(),
                status: CoverageStatus::Covered,
                strength: 0.8,
            },
            FacetSummary {
                facet_id: "facet-001".to_string(),
                kind: FacetKind::MustInclude,
                description: "pinning".to_string(),
                status: CoverageStatus::Uncovered,
                strength: 0.1,
            },
        ];
        EvidencePack {
            topic_id: "t1".to_string(),
            topic_name: "Borrowing".to_string(),
            source_id: "guide".to_string(),
            token_estimate: EvidencePack::estimate_tokens(&chunks),
            chunks,
            coverage: CoverageSummary {
                overall: 0.45,
                diversity: 1.0,
                covered: 1,
                partial: 0,
                uncovered: 1,
                facets,
            },
            facet_support: BTreeMap::new(),
            gaps: vec![GapWarning {
                facet_id: "facet-001".to_string(),
                kind: FacetKind::MustInclude,
                description: "pinning".to_string(),
                severity: GapSeverity::Missing,
                strength: 0.1,
                message: "no evidence for pinning".to_string(),
            }],
            channels: Vec::new(),
            assembled_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_layout() {
        let mut second = chunk("c2", "Mutable references are exclusive.", &["facet-000"]);
        second.transition = Some("[Borrowing]".to_string());
        second.parent_excerpt = Some(ParentExcerpt {
            heading: Some("Borrowing".to_string()),
            text: "Shared references allow many readers.".to_string(),
        });
        let pack = pack(vec![chunk("c1", "Aliasing is restricted.", &[]), second]);

        let expected = "=== Evidence for: Borrowing ===\n\
            (2 chunks, ~25 tokens)\n\
            Covered: aliasing\n\
            Missing: pinning\n\
            \n\
            Aliasing is restricted.\n\
            \n\
            ---\n\
            \n\
            [Borrowing]\n\
            [Context: Borrowing]\n\
            Shared references allow many readers.\n\
            \n\
            Mutable references are exclusive.\n\
            [Relevant to: aliasing]\n";
        assert_eq!(pack.render(), expected);
    }

    #[test]
    fn test_empty_pack_renders_header_only() {
        let pack = pack(Vec::new());
        let rendered = pack.render();
        assert!(rendered.starts_with("=== Evidence for: Borrowing ===\n(0 chunks, ~0 tokens)\n"));
        assert!(!rendered.contains(CHUNK_SEPARATOR));
        assert!(!pack.is_complete());
    }

    #[test]
    fn test_pack_serializes_to_json() {
        let pack = pack(vec![chunk("c1", "text", &["facet-000"])]);
        let json = serde_json::to_value(&pack).unwrap();
        assert_eq!(json["chunks"][0]["chunk_id"], "c1");
        assert_eq!(json["gaps"][0]["severity"], "missing");
        assert_eq!(json["coverage"]["facets"][1]["status"], "uncovered");
    }
}
