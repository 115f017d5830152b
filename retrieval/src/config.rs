//! Engine configuration.
//!
//! One [`EngineConfig`] is built up front (defaults, a TOML string or a TOML
//! file) and handed to every component constructor. Nothing is read from the
//! environment.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use evidence_embeddings::ProviderConfig;
use evidence_hierarchy::{Bm25Scorer, ChunkerConfig, EmbedderConfig, IndexConfig};

use crate::assembler::AssemblerConfig;
use crate::error::{Result, RetrievalError};
use crate::planner::PlannerConfig;
use crate::retriever::RetrieverConfig;
use crate::scorer::ScorerConfig;
use crate::selector::SelectorConfig;

/// BM25 parameters for the default sparse scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseConfig {
    pub k1: f32,
    pub b: f32,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl SparseConfig {
    pub fn scorer(&self) -> Bm25Scorer {
        Bm25Scorer::new(self.k1, self.b)
    }
}

/// Configuration for the whole engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub provider: ProviderConfig,
    pub chunker: ChunkerConfig,
    pub embedder: EmbedderConfig,
    pub index: IndexConfig,
    pub sparse: SparseConfig,
    pub planner: PlannerConfig,
    pub retriever: RetrieverConfig,
    pub scorer: ScorerConfig,
    pub selector: SelectorConfig,
    pub assembler: AssemblerConfig,

    /// Topics retrieved concurrently by `retrieve_all`.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            chunker: ChunkerConfig::default(),
            embedder: EmbedderConfig::default(),
            index: IndexConfig::default(),
            sparse: SparseConfig::default(),
            planner: PlannerConfig::default(),
            retriever: RetrieverConfig::default(),
            scorer: ScorerConfig::default(),
            selector: SelectorConfig::default(),
            assembler: AssemblerConfig::default(),
            workers: 4,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).await?;
        Self::from_toml_str(&content)
    }

    /// Use the local hashing provider.
    pub fn with_hashing_provider(mut self, dimension: usize) -> Self {
        self.provider = ProviderConfig::hashing(dimension);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_retriever(mut self, retriever: RetrieverConfig) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn with_selector(mut self, selector: SelectorConfig) -> Self {
        self.selector = selector;
        self
    }

    /// Reject inconsistent thresholds, negative weights and empty pools.
    pub fn validate(&self) -> Result<()> {
        let chunker = &self.chunker;
        ensure(
            chunker.min_chunk_chars > 0,
            "chunker min_chunk_chars must be positive",
        )?;
        ensure(
            chunker.min_chunk_chars <= chunker.target_chunk_chars
                && chunker.target_chunk_chars <= chunker.max_chunk_chars,
            "chunker sizes must satisfy min <= target <= max",
        )?;
        ensure(
            chunker.min_block_chars <= chunker.max_block_chars,
            "chunker min_block_chars must not exceed max_block_chars",
        )?;

        let embedder = &self.embedder;
        ensure(unit(embedder.alpha), "embedder alpha must be in [0, 1]")?;
        ensure(
            embedder.batch_size > 0 && embedder.concurrency > 0,
            "embedder batch_size and concurrency must be positive",
        )?;

        ensure(
            self.sparse.k1.is_finite() && self.sparse.k1 >= 0.0 && unit(self.sparse.b),
            "sparse k1 must be non-negative and b in [0, 1]",
        )?;

        let retriever = &self.retriever;
        ensure(
            retriever.dense_enabled || retriever.sparse_enabled || retriever.parent_enabled,
            "at least one retrieval channel must be enabled",
        )?;
        ensure(
            unit(retriever.parent_discount),
            "retriever parent_discount must be in [0, 1]",
        )?;
        ensure(
            retriever.router.is_valid(),
            "channel weights must be finite and non-negative",
        )?;
        ensure(
            self.scorer.is_valid(),
            "scorer weights must be finite and non-negative",
        )?;

        let selector = &self.selector;
        ensure(
            unit(selector.partial_threshold)
                && unit(selector.covered_threshold)
                && selector.partial_threshold <= selector.covered_threshold,
            "selector thresholds must satisfy 0 <= partial <= covered <= 1",
        )?;
        ensure(unit(selector.min_support), "selector min_support must be in [0, 1]")?;
        ensure(
            selector.diversity_threshold > 0.0 && selector.diversity_threshold <= 1.0,
            "selector diversity_threshold must be in (0, 1]",
        )?;
        ensure(
            selector.max_selected > 0 && selector.max_per_facet > 0,
            "selector max_selected and max_per_facet must be positive",
        )?;
        let weights = &selector.kind_weights;
        ensure(
            [weights.must_include, weights.general_topic, weights.navigation]
                .iter()
                .all(|w| w.is_finite() && *w >= 0.0),
            "facet kind weights must be finite and non-negative",
        )?;

        ensure(
            self.assembler.excerpt_chars > 0,
            "assembler excerpt_chars must be positive",
        )?;
        ensure(self.workers > 0, "workers must be positive")?;
        Ok(())
    }
}

fn unit(value: f32) -> bool {
    (0.0..=1.0).contains(&value)
}

fn ensure(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(RetrievalError::Config(message.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidence_embeddings::ProviderKind;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.selector.max_selected, 8);
        assert_eq!(config.sparse, SparseConfig { k1: 1.2, b: 0.75 });
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            workers = 2

            [provider]
            kind = "hashing"
            dimension = 64

            [selector]
            max_selected = 5

            [retriever.router.must_include]
            dense = 0.5
            sparse = 0.5
            parent = 0.0
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, 2);
        assert_eq!(config.provider.kind, ProviderKind::Hashing);
        assert_eq!(config.provider.dimension, 64);
        assert_eq!(config.selector.max_selected, 5);
        assert_eq!(config.selector.covered_threshold, 0.6);
        assert_eq!(config.retriever.router.must_include.parent, 0.0);
        assert_eq!(config.retriever.parent_discount, 0.8);
    }

    #[test]
    fn test_inconsistent_thresholds_are_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [selector]
            covered_threshold = 0.2
            partial_threshold = 0.5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, RetrievalError::Config(ref msg) if msg.contains("partial <= covered")));
    }

    #[test]
    fn test_negative_weights_are_rejected() {
        let mut config = EngineConfig::default();
        config.scorer.redundancy_weight = -0.2;
        assert!(matches!(config.validate(), Err(RetrievalError::Config(_))));

        let config = EngineConfig::default().with_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_minimum_chunk_size_is_rejected() {
        let mut config = EngineConfig::default();
        config.chunker = config.chunker.with_chunk_band(0, 0, 50);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RetrievalError::Config(ref msg) if msg.contains("min_chunk_chars")));
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let err = EngineConfig::from_toml_str("workers = \"many\"").unwrap_err();
        assert!(matches!(err, RetrievalError::ConfigParse(_)));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[assembler]\nexcerpt_chars = 120\n").unwrap();

        let config = EngineConfig::load(&path).await.unwrap();
        assert_eq!(config.assembler.excerpt_chars, 120);

        let missing = EngineConfig::load(dir.path().join("missing.toml")).await;
        assert!(matches!(missing, Err(RetrievalError::Io(_))));
    }
}
