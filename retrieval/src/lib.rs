//! # Evidence Retrieval
//!
//! Coverage-driven evidence retrieval over hierarchical documents.
//!
//! Given a [`TopicDirective`], the engine does not return the top K chunks.
//! It splits the topic into facets, retrieves candidates for each facet
//! through several channels, and selects a small, diverse set of chunks that
//! covers every facet, reporting the ones it could not cover.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          EvidenceEngine                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ingest:   text ──► HierarchicalChunker ──► MultiGranularEmbedder    │
//! │                                                    │                 │
//! │                                                    ▼                 │
//! │                                          HierarchicalIndex           │
//! │                                        (chunks + blocks, versioned)  │
//! │                                                    │                 │
//! │  retrieve: TopicDirective                          │ snapshot        │
//! │              │                                     ▼                 │
//! │              ▼                                                       │
//! │      FacetPlanner ──► MultiChannelRetriever (dense │ sparse │ parent)│
//! │                                 │                                    │
//! │                                 ▼                                    │
//! │                FusionScorer ──► CoverageSelector ──► ContextAssembler│
//! │                                                           │          │
//! │                                                           ▼          │
//! │                                                     EvidencePack     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use evidence_retrieval::{EngineConfig, EvidenceEngine, TopicDirective};
//!
//! let engine = EvidenceEngine::new(EngineConfig::default().with_hashing_provider(256))?;
//! engine.ingest("guide", &text).await?;
//!
//! let directive = TopicDirective::new("borrowing", "Borrowing")
//!     .with_must_include(["shared references", "mutable references"]);
//! let pack = engine.retrieve("guide", &directive).await?;
//! println!("{}", pack.render());
//! ```

pub mod assembler;
pub mod config;
pub mod directive;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod graph;
pub mod planner;
pub mod retriever;
pub mod router;
pub mod scorer;
pub mod selector;

pub use assembler::{AssemblerConfig, ContextAssembler, ParentLookup};
pub use config::{EngineConfig, SparseConfig};
pub use directive::{NarrativeOverride, NavigationContext, TopicDirective};
pub use engine::{EvidenceEngine, EvidenceEngineBuilder, IngestReport};
pub use error::{Result, RetrievalError};
pub use evidence::{
    ContextualChunk, CoverageSummary, EvidencePack, FacetSummary, GapSeverity, GapWarning,
    ParentExcerpt,
};
pub use graph::{Chain, FanOut, Step, StepExt};
pub use planner::{
    Complexity, Exclusion, Facet, FacetKind, FacetOrigin, FacetPlanner, PlannerConfig, QueryPlan,
    RecommendedK,
};
pub use retriever::{
    ChannelReport, ChannelStatus, MultiChannelRetriever, RetrievalCandidate, RetrievalResult,
    RetrieverConfig,
};
pub use router::{Channel, ChannelWeights, FacetRouter, RouterConfig};
pub use scorer::{FusionScorer, ScoredCandidate, ScorerConfig, VectorLookup};
pub use selector::{
    CoverageResult, CoverageSelector, CoverageStatus, FacetCoverage, KindWeights, SelectorConfig,
};
