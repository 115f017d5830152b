//! The evidence engine.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use evidence_embeddings::{EmbeddingProvider, build_provider};
use evidence_hierarchy::{
    EmbeddingFailure, HierarchicalChunker, HierarchicalIndex, InMemoryBackend, IndexReceipt,
    IndexStats, MultiGranularEmbedder, SparseScorer, VectorBackend,
};

use crate::assembler::ContextAssembler;
use crate::config::EngineConfig;
use crate::directive::TopicDirective;
use crate::error::{Result, RetrievalError};
use crate::evidence::EvidencePack;
use crate::graph::{Chain, FanOut, Step, StepExt};
use crate::planner::{FacetPlanner, QueryPlan};
use crate::retriever::{MultiChannelRetriever, RetrievalResult};
use crate::scorer::{FusionScorer, ScoredCandidate};
use crate::selector::{CoverageResult, CoverageSelector};

/// Evidence engine that ingests documents and answers topic directives.
///
/// Ingestion runs chunking, embedding and indexing for one source at a
/// time. Retrieval runs the pipeline
///
/// ```text
/// plan ──► retrieve ──► score ──► select ──► assemble
/// ```
///
/// against an immutable snapshot of the source, so many retrievals can run
/// while a re-ingest is in progress.
pub struct EvidenceEngine {
    /// Configuration.
    config: EngineConfig,

    /// Embedding provider shared by ingestion and planning.
    provider: Arc<dyn EmbeddingProvider>,

    chunker: HierarchicalChunker,
    embedder: MultiGranularEmbedder,
    index: Arc<HierarchicalIndex>,

    /// Retrieval pipeline, shared with fan-out workers.
    pipeline: Arc<Pipeline>,
}

type Pipeline = Chain<Chain<Chain<Chain<PlanStep, RetrieveStep>, ScoreStep>, SelectStep>, AssembleStep>;

impl EvidenceEngine {
    /// Create a new engine builder.
    pub fn builder() -> EvidenceEngineBuilder {
        EvidenceEngineBuilder::new()
    }

    /// Build an engine from `config` with the default backend and scorer.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder().with_config(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn index(&self) -> &Arc<HierarchicalIndex> {
        &self.index
    }

    /// Chunk, embed and index `text` as the new version of `source_id`.
    pub async fn ingest(&self, source_id: &str, text: &str) -> Result<IngestReport> {
        let document = self.chunker.chunk(source_id, text);
        let (blocks, chunks) = (document.block_count(), document.chunk_count());
        debug!("Chunked {source_id} into {blocks} blocks and {chunks} chunks");

        let embeddings = self.embedder.embed(&document).await;
        let embedding_failures = embeddings.failures.clone();
        if !embedding_failures.is_empty() {
            warn!(
                "{} items of {source_id} have no vector and are searchable lexically only",
                embedding_failures.len()
            );
        }

        let receipt = self.index.add(document, embeddings).await?;
        info!(
            "Ingested {source_id} v{} ({blocks} blocks, {chunks} chunks)",
            receipt.version
        );

        Ok(IngestReport {
            receipt,
            blocks,
            chunks,
            embedding_failures,
        })
    }

    /// Remove every version of `source_id`. Returns whether it was indexed.
    pub async fn remove_source(&self, source_id: &str) -> Result<bool> {
        Ok(self.index.remove_source(source_id).await?)
    }

    /// Assemble the evidence pack for one directive.
    pub async fn retrieve(&self, source_id: &str, directive: &TopicDirective) -> Result<EvidencePack> {
        let request = RetrievalRequest {
            source_id: source_id.to_string(),
            directive: directive.clone(),
        };
        Ok(self.pipeline.run(request).await?)
    }

    /// Assemble evidence packs for many directives on the worker pool.
    ///
    /// The i-th result belongs to the i-th directive; one failing directive
    /// does not affect the others.
    pub async fn retrieve_all(
        &self,
        source_id: &str,
        directives: Vec<TopicDirective>,
    ) -> Vec<Result<EvidencePack>> {
        let requests = directives
            .into_iter()
            .map(|directive| RetrievalRequest {
                source_id: source_id.to_string(),
                directive,
            })
            .collect();

        FanOut::from_arc(Arc::clone(&self.pipeline), self.config.workers)
            .run_all(requests)
            .await
            .into_iter()
            .map(|result| result.map_err(RetrievalError::from))
            .collect()
    }

    /// Get index statistics.
    pub async fn stats(&self) -> Result<IndexStats> {
        Ok(self.index.stats().await?)
    }
}

/// Outcome of [`EvidenceEngine::ingest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub receipt: IndexReceipt,
    pub blocks: usize,
    pub chunks: usize,

    /// Items that were indexed without a vector.
    pub embedding_failures: Vec<EmbeddingFailure>,
}

/// Builder for [`EvidenceEngine`].
pub struct EvidenceEngineBuilder {
    config: EngineConfig,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    backend: Option<Arc<dyn VectorBackend>>,
    sparse: Option<Arc<dyn SparseScorer>>,
}

impl EvidenceEngineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            provider: None,
            backend: None,
            sparse: None,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `provider` instead of the one described by the configuration.
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the vector backend. Defaults to [`InMemoryBackend`].
    pub fn with_backend(mut self, backend: Arc<dyn VectorBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the lexical scorer. Defaults to BM25 with the configured parameters.
    pub fn with_sparse_scorer(mut self, sparse: Arc<dyn SparseScorer>) -> Self {
        self.sparse = Some(sparse);
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<EvidenceEngine> {
        let config = self.config;
        config.validate()?;

        let provider = match self.provider {
            Some(provider) => provider,
            None => build_provider(&config.provider)?,
        };
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(InMemoryBackend::new()));
        let sparse = self
            .sparse
            .unwrap_or_else(|| Arc::new(config.sparse.scorer()));
        info!(
            "Building evidence engine (provider: {}, backend: {}, sparse: {})",
            provider.name(),
            backend.name(),
            sparse.name()
        );

        let index = Arc::new(HierarchicalIndex::new(
            backend,
            sparse,
            config.index.clone(),
        ));

        let pipeline = PlanStep {
            planner: FacetPlanner::new(Arc::clone(&provider), config.planner.clone()),
        }
        .then(RetrieveStep {
            retriever: MultiChannelRetriever::new(Arc::clone(&index), config.retriever.clone()),
        })
        .then(ScoreStep {
            scorer: FusionScorer::new(config.scorer.clone(), config.retriever.router.clone()),
        })
        .then(SelectStep {
            selector: CoverageSelector::new(config.selector.clone()),
        })
        .then(AssembleStep {
            assembler: ContextAssembler::new(config.assembler.clone()),
        });

        Ok(EvidenceEngine {
            chunker: HierarchicalChunker::new(config.chunker.clone()),
            embedder: MultiGranularEmbedder::new(Arc::clone(&provider), config.embedder.clone()),
            index,
            pipeline: Arc::new(pipeline),
            provider,
            config,
        })
    }
}

impl Default for EvidenceEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct RetrievalRequest {
    source_id: String,
    directive: TopicDirective,
}

struct Planned {
    source_id: String,
    plan: QueryPlan,
}

struct Retrieved {
    plan: QueryPlan,
    result: RetrievalResult,
}

struct Scored {
    plan: QueryPlan,
    result: RetrievalResult,
    candidates: Vec<ScoredCandidate>,
}

struct Selected {
    scored: Scored,
    coverage: CoverageResult,
}

struct PlanStep {
    planner: FacetPlanner,
}

#[async_trait]
impl Step for PlanStep {
    type Input = RetrievalRequest;
    type Output = Planned;

    fn name(&self) -> &str {
        "plan"
    }

    async fn run(&self, request: RetrievalRequest) -> anyhow::Result<Planned> {
        let plan = self.planner.plan(&request.directive).await;
        Ok(Planned {
            source_id: request.source_id,
            plan,
        })
    }
}

struct RetrieveStep {
    retriever: MultiChannelRetriever,
}

#[async_trait]
impl Step for RetrieveStep {
    type Input = Planned;
    type Output = Retrieved;

    fn name(&self) -> &str {
        "retrieve"
    }

    async fn run(&self, planned: Planned) -> anyhow::Result<Retrieved> {
        let result = self
            .retriever
            .retrieve(&planned.source_id, &planned.plan)
            .await?;
        Ok(Retrieved {
            plan: planned.plan,
            result,
        })
    }
}

struct ScoreStep {
    scorer: FusionScorer,
}

#[async_trait]
impl Step for ScoreStep {
    type Input = Retrieved;
    type Output = Scored;

    fn name(&self) -> &str {
        "score"
    }

    async fn run(&self, retrieved: Retrieved) -> anyhow::Result<Scored> {
        let Retrieved { plan, result } = retrieved;
        let candidates = self.scorer.score(&plan, &result, result.snapshot.as_ref());
        Ok(Scored {
            plan,
            result,
            candidates,
        })
    }
}

struct SelectStep {
    selector: CoverageSelector,
}

#[async_trait]
impl Step for SelectStep {
    type Input = Scored;
    type Output = Selected;

    fn name(&self) -> &str {
        "select"
    }

    async fn run(&self, scored: Scored) -> anyhow::Result<Selected> {
        let coverage = self.selector.select(&scored.plan.facets, &scored.candidates);
        Ok(Selected { scored, coverage })
    }
}

struct AssembleStep {
    assembler: ContextAssembler,
}

#[async_trait]
impl Step for AssembleStep {
    type Input = Selected;
    type Output = EvidencePack;

    fn name(&self) -> &str {
        "assemble"
    }

    async fn run(&self, selected: Selected) -> anyhow::Result<EvidencePack> {
        let Selected { scored, coverage } = selected;
        let Scored {
            plan,
            result,
            candidates,
        } = scored;

        let mut pack = self.assembler.assemble(
            &plan,
            &candidates,
            &coverage,
            result.snapshot.document.as_ref(),
        );
        pack.channels = result.reports;
        Ok(pack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidence_embeddings::HashingProvider;
    use pretty_assertions::assert_eq;

    const GUIDE: &str = "# Ownership\n\nEach value has one owner. Moving a value transfers ownership.\n\n# Borrowing\n\nShared references allow many readers. Mutable references are exclusive.";

    fn engine() -> EvidenceEngine {
        EvidenceEngine::new(EngineConfig::default().with_hashing_provider(128)).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_reports_counts_and_versions() {
        let engine = engine();

        let first = engine.ingest("guide", GUIDE).await.unwrap();
        assert_eq!((first.blocks, first.chunks), (2, 2));
        assert_eq!(first.receipt.version, 1);
        assert!(first.embedding_failures.is_empty());

        let second = engine.ingest("guide", GUIDE).await.unwrap();
        assert_eq!(second.receipt.replaced, Some(1));
        assert_eq!(engine.stats().await.unwrap().sources, 1);
    }

    #[tokio::test]
    async fn test_retrieve_builds_a_pack() {
        let engine = engine();
        engine.ingest("guide", GUIDE).await.unwrap();

        let directive = TopicDirective::new("t1", "Borrowing").with_must_include(["mutable references"]);
        let pack = engine.retrieve("guide", &directive).await.unwrap();

        assert_eq!(pack.topic_id, "t1");
        assert_eq!(pack.source_id, "guide");
        assert!(!pack.chunks.is_empty());
        assert_eq!(pack.channels.len(), 2 * 3);
        assert_eq!(pack.coverage.facets.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_source_is_not_indexed() {
        let engine = engine();
        let err = engine
            .retrieve("missing", &TopicDirective::new("t1", "Borrowing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::NotIndexed { ref source_id } if source_id == "missing"));
    }

    #[tokio::test]
    async fn test_remove_source() {
        let engine = engine();
        engine.ingest("guide", GUIDE).await.unwrap();

        assert!(engine.remove_source("guide").await.unwrap());
        assert!(!engine.remove_source("guide").await.unwrap());
        assert!(!engine.index().is_indexed("guide").await);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = EvidenceEngine::builder()
            .with_config(EngineConfig::default().with_workers(0))
            .with_provider(Arc::new(HashingProvider::new(16)))
            .build();
        assert!(matches!(result, Err(RetrievalError::Config(_))));
    }
}
