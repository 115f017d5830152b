//! The hierarchical index.
//!
//! Holds every indexed source as an immutable [`IndexedSource`] snapshot
//! behind an `Arc`. Vectors live in a [`VectorBackend`] (two collections,
//! chunks and blocks); lexical statistics live in the snapshot as
//! [`SparseCorpus`]es scored by an injected [`SparseScorer`].
//!
//! Writes are serialized by an async mutex. A re-index upserts the new
//! version's records, swaps the registry entry, then deletes the previous
//! version's records, so readers holding either snapshot stay consistent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use evidence_embeddings::Embedding;

use crate::backend::{Collection, RecordFilter, RecordMetadata, VectorBackend, VectorRecord};
use crate::document::{Block, BlockId, Chunk, ChunkId, HierarchicalDocument};
use crate::embedder::DocumentEmbeddings;
use crate::error::{HierarchyError, Result};
use crate::sparse::{SparseCorpus, SparseScorer};

/// Which chunk vector is stored in the chunk collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenseVector {
    /// The plain chunk embedding.
    #[default]
    Chunk,
    /// The chunk/block blend, falling back to the plain chunk embedding.
    Contextualized,
}

/// Configuration for the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub dense_vector: DenseVector,
}

/// A query against one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    /// k-NN over stored vectors.
    Vector(Embedding),
    /// Lexical scoring over stored texts.
    Text(String),
}

/// One search result, resolved against the snapshot it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub collection: Collection,
    pub block_id: BlockId,

    /// Set for chunk-collection hits.
    pub chunk_id: Option<ChunkId>,

    pub block_position: usize,
    pub chunk_position: Option<usize>,
    pub score: f32,
    pub text: String,
}

impl RetrievalHit {
    /// Document position used for tie-breaks.
    pub fn position(&self) -> (usize, usize) {
        (self.block_position, self.chunk_position.unwrap_or(0))
    }
}

/// One version of one source, as seen by readers.
#[derive(Debug)]
pub struct IndexedSource {
    pub version: u64,
    pub document: Arc<HierarchicalDocument>,
    pub embeddings: Arc<DocumentEmbeddings>,
    pub chunk_corpus: SparseCorpus,
    pub block_corpus: SparseCorpus,
    pub indexed_at: DateTime<Utc>,
}

impl IndexedSource {
    /// The plain embedding of a chunk.
    pub fn chunk_vector(&self, chunk: &ChunkId) -> Option<&Embedding> {
        self.embeddings.chunks.get(chunk)
    }

    /// The summary embedding of a block.
    pub fn block_vector(&self, block: &BlockId) -> Option<&Embedding> {
        self.embeddings.blocks.get(block)
    }

    fn corpus(&self, collection: Collection) -> &SparseCorpus {
        match collection {
            Collection::Chunks => &self.chunk_corpus,
            Collection::Blocks => &self.block_corpus,
        }
    }

    fn hit(&self, collection: Collection, item_id: &str, score: f32) -> Option<RetrievalHit> {
        match collection {
            Collection::Chunks => {
                let chunk = self.document.chunk(&ChunkId::from(item_id))?;
                let block = self.document.parent_of(&chunk.id)?;
                Some(RetrievalHit {
                    collection,
                    block_id: block.id.clone(),
                    chunk_id: Some(chunk.id.clone()),
                    block_position: block.position,
                    chunk_position: Some(chunk.position),
                    score,
                    text: chunk.text.clone(),
                })
            }
            Collection::Blocks => {
                let block = self.document.block(&BlockId::from(item_id))?;
                Some(RetrievalHit {
                    collection,
                    block_id: block.id.clone(),
                    chunk_id: None,
                    block_position: block.position,
                    chunk_position: None,
                    score,
                    text: block.text.clone(),
                })
            }
        }
    }
}

/// Returned by [`HierarchicalIndex::add`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReceipt {
    pub source_id: String,
    pub version: u64,

    /// Version that was replaced, if any.
    pub replaced: Option<u64>,

    pub chunk_records: usize,
    pub block_records: usize,

    /// Items indexed without a vector (lexical channel only).
    pub missing_vectors: usize,

    pub indexed_at: DateTime<Utc>,
}

/// Index-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub sources: usize,
    pub blocks: usize,
    pub chunks: usize,
    pub chunk_records: usize,
    pub block_records: usize,
    pub backend: String,
    pub sparse_scorer: String,
}

/// Two-collection index over hierarchical documents.
pub struct HierarchicalIndex {
    backend: Arc<dyn VectorBackend>,
    sparse: Arc<dyn SparseScorer>,
    config: IndexConfig,
    sources: RwLock<HashMap<String, Arc<IndexedSource>>>,
    /// Single-writer guard; holds the last assigned version.
    writer: Mutex<u64>,
}

impl HierarchicalIndex {
    /// Create an empty index.
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        sparse: Arc<dyn SparseScorer>,
        config: IndexConfig,
    ) -> Self {
        Self {
            backend,
            sparse,
            config,
            sources: RwLock::new(HashMap::new()),
            writer: Mutex::new(0),
        }
    }

    /// The vector backend.
    pub fn backend(&self) -> &Arc<dyn VectorBackend> {
        &self.backend
    }

    /// The lexical scorer.
    pub fn sparse_scorer(&self) -> &Arc<dyn SparseScorer> {
        &self.sparse
    }

    /// Index a document version, replacing any previous version of its source.
    pub async fn add(
        &self,
        document: HierarchicalDocument,
        embeddings: DocumentEmbeddings,
    ) -> Result<IndexReceipt> {
        if !embeddings.matches(&document) {
            return Err(HierarchyError::MismatchedEmbeddings {
                expected: format!("{}@{}", document.source_id, document.content_hash),
                actual: format!("{}@{}", embeddings.source_id, embeddings.content_hash),
            });
        }

        let mut last_version = self.writer.lock().await;
        let version = *last_version + 1;
        let source_id = document.source_id.clone();

        let (chunk_records, block_records, missing_vectors) =
            self.records(&document, &embeddings, version);
        let (chunk_count, block_count) = (chunk_records.len(), block_records.len());

        if let Err(err) = self.upsert_version(chunk_records, block_records).await {
            self.delete_version(&source_id, version).await;
            return Err(err);
        }
        *last_version = version;

        let chunk_corpus =
            SparseCorpus::build(document.chunks().map(|c| (c.id.as_str(), c.text.as_str())));
        let block_corpus = SparseCorpus::build(
            document
                .blocks()
                .iter()
                .map(|b| (b.id.as_str(), b.text.as_str())),
        );

        let indexed_at = Utc::now();
        let entry = Arc::new(IndexedSource {
            version,
            document: Arc::new(document),
            embeddings: Arc::new(embeddings),
            chunk_corpus,
            block_corpus,
            indexed_at,
        });

        let previous = self
            .sources
            .write()
            .await
            .insert(source_id.clone(), entry);

        let replaced = previous.map(|p| p.version);
        if let Some(old) = replaced {
            self.delete_version(&source_id, old).await;
        }

        info!(
            "Indexed {source_id} v{version}: {chunk_count} chunk records, {block_count} block records"
        );

        Ok(IndexReceipt {
            source_id,
            version,
            replaced,
            chunk_records: chunk_count,
            block_records: block_count,
            missing_vectors,
            indexed_at,
        })
    }

    fn records(
        &self,
        document: &HierarchicalDocument,
        embeddings: &DocumentEmbeddings,
        version: u64,
    ) -> (Vec<VectorRecord>, Vec<VectorRecord>, usize) {
        let mut chunks = Vec::new();
        let mut blocks = Vec::new();
        let mut missing = 0;

        for block in document.blocks() {
            for chunk in &block.chunks {
                let vector = match self.config.dense_vector {
                    DenseVector::Chunk => embeddings.chunks.get(&chunk.id),
                    DenseVector::Contextualized => embeddings
                        .contextualized
                        .get(&chunk.id)
                        .or_else(|| embeddings.chunks.get(&chunk.id)),
                };
                let Some(vector) = vector else {
                    missing += 1;
                    continue;
                };
                chunks.push(VectorRecord {
                    vector: vector.clone(),
                    text: chunk.text.clone(),
                    metadata: RecordMetadata {
                        source_id: document.source_id.clone(),
                        version,
                        item_id: chunk.id.to_string(),
                        block_id: block.id.clone(),
                        block_position: block.position,
                        chunk_position: Some(chunk.position),
                        prev: chunk.prev.as_ref().map(ToString::to_string),
                        next: chunk.next.as_ref().map(ToString::to_string),
                        heading: block.heading.clone(),
                        block_type: block.block_type,
                    },
                });
            }

            let Some(vector) = embeddings.blocks.get(&block.id) else {
                missing += 1;
                continue;
            };
            blocks.push(VectorRecord {
                vector: vector.clone(),
                text: block.text.clone(),
                metadata: RecordMetadata {
                    source_id: document.source_id.clone(),
                    version,
                    item_id: block.id.to_string(),
                    block_id: block.id.clone(),
                    block_position: block.position,
                    chunk_position: None,
                    prev: block.prev.as_ref().map(ToString::to_string),
                    next: block.next.as_ref().map(ToString::to_string),
                    heading: block.heading.clone(),
                    block_type: block.block_type,
                },
            });
        }

        (chunks, blocks, missing)
    }

    async fn upsert_version(
        &self,
        chunks: Vec<VectorRecord>,
        blocks: Vec<VectorRecord>,
    ) -> Result<()> {
        self.backend.upsert(Collection::Chunks, chunks).await?;
        self.backend.upsert(Collection::Blocks, blocks).await?;
        Ok(())
    }

    async fn delete_version(&self, source_id: &str, version: u64) {
        let filter = RecordFilter::source(source_id).with_version(version);
        for collection in Collection::ALL {
            match self.backend.delete(collection, &filter).await {
                Ok(removed) => debug!(
                    "Deleted {removed} {} records of {source_id} v{version}",
                    collection.as_str()
                ),
                Err(err) => warn!(
                    "Failed to delete {} records of {source_id} v{version}: {err}",
                    collection.as_str()
                ),
            }
        }
    }

    /// Remove a source and all of its records. Returns whether it was indexed.
    pub async fn remove_source(&self, source_id: &str) -> Result<bool> {
        let _writer = self.writer.lock().await;
        let removed = self.sources.write().await.remove(source_id);
        if removed.is_none() {
            return Ok(false);
        }

        let filter = RecordFilter::source(source_id);
        for collection in Collection::ALL {
            self.backend.delete(collection, &filter).await?;
        }
        info!("Removed {source_id} from the index");
        Ok(true)
    }

    /// Whether `source_id` is currently indexed.
    pub async fn is_indexed(&self, source_id: &str) -> bool {
        self.sources.read().await.contains_key(source_id)
    }

    /// The current snapshot of a source.
    pub async fn snapshot(&self, source_id: &str) -> Result<Arc<IndexedSource>> {
        self.sources
            .read()
            .await
            .get(source_id)
            .cloned()
            .ok_or_else(|| HierarchyError::NotIndexed {
                source_id: source_id.to_string(),
            })
    }

    /// The current document of a source.
    pub async fn document(&self, source_id: &str) -> Result<Arc<HierarchicalDocument>> {
        Ok(Arc::clone(&self.snapshot(source_id).await?.document))
    }

    /// The plain embedding of a chunk, if one was computed.
    pub async fn chunk_vector(&self, source_id: &str, chunk: &ChunkId) -> Result<Option<Embedding>> {
        Ok(self.snapshot(source_id).await?.chunk_vector(chunk).cloned())
    }

    /// The summary embedding of a block, if one was computed.
    pub async fn block_vector(&self, source_id: &str, block: &BlockId) -> Result<Option<Embedding>> {
        Ok(self.snapshot(source_id).await?.block_vector(block).cloned())
    }

    /// Search one collection of the current version of `source_id`.
    pub async fn search(
        &self,
        source_id: &str,
        collection: Collection,
        query: &SearchQuery,
        k: usize,
    ) -> Result<Vec<RetrievalHit>> {
        let snapshot = self.snapshot(source_id).await?;
        self.search_snapshot(&snapshot, collection, query, k).await
    }

    /// Search one collection of a specific snapshot.
    ///
    /// Results are ranked by score, ties broken by document position.
    pub async fn search_snapshot(
        &self,
        snapshot: &IndexedSource,
        collection: Collection,
        query: &SearchQuery,
        k: usize,
    ) -> Result<Vec<RetrievalHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<RetrievalHit> = match query {
            SearchQuery::Vector(vector) => {
                if !self.backend.is_available() {
                    return Err(HierarchyError::Backend(format!(
                        "{} is unavailable",
                        self.backend.name()
                    )));
                }
                let filter = RecordFilter::source(snapshot.document.source_id.as_str())
                    .with_version(snapshot.version);
                self.backend
                    .query(collection, vector, k, &filter)
                    .await?
                    .into_iter()
                    .filter_map(|record| snapshot.hit(collection, &record.metadata.item_id, record.score))
                    .collect()
            }
            SearchQuery::Text(text) => {
                if !self.sparse.is_available() {
                    return Err(HierarchyError::Sparse(format!(
                        "{} is unavailable",
                        self.sparse.name()
                    )));
                }
                let corpus = snapshot.corpus(collection);
                let scores = self.sparse.score(corpus, text)?;
                corpus
                    .entries()
                    .iter()
                    .zip(scores)
                    .filter(|(_, score)| *score > 0.0)
                    .filter_map(|(entry, score)| snapshot.hit(collection, &entry.id, score))
                    .collect()
            }
        };

        hits.sort_by(|a, b| {
            OrderedFloat(b.score)
                .cmp(&OrderedFloat(a.score))
                .then_with(|| a.position().cmp(&b.position()))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Chunks within `window` positions of `chunk` in its block, in order,
    /// including `chunk` itself.
    pub async fn expand_neighbors(
        &self,
        source_id: &str,
        chunk: &ChunkId,
        window: usize,
    ) -> Result<Vec<Chunk>> {
        let snapshot = self.snapshot(source_id).await?;
        let (block, position) = Self::locate(&snapshot.document, chunk)?;

        let first = position.saturating_sub(window);
        let last = (position + window).min(block.chunks.len().saturating_sub(1));
        Ok(block.chunks[first..=last].to_vec())
    }

    /// The block that owns `chunk`.
    pub async fn expand_parent(&self, source_id: &str, chunk: &ChunkId) -> Result<Block> {
        let snapshot = self.snapshot(source_id).await?;
        let (block, _) = Self::locate(&snapshot.document, chunk)?;
        Ok(block.clone())
    }

    /// All chunks of a block, in order.
    pub async fn block_chunks(&self, source_id: &str, block: &BlockId) -> Result<Vec<Chunk>> {
        let snapshot = self.snapshot(source_id).await?;
        snapshot
            .document
            .block(block)
            .map(|b| b.chunks.clone())
            .ok_or_else(|| HierarchyError::UnknownBlock {
                block_id: block.to_string(),
            })
    }

    fn locate<'a>(document: &'a HierarchicalDocument, chunk: &ChunkId) -> Result<(&'a Block, usize)> {
        let unknown = || HierarchyError::UnknownChunk {
            chunk_id: chunk.to_string(),
        };
        let block = document.parent_of(chunk).ok_or_else(unknown)?;
        let (_, position) = document.position_of(chunk).ok_or_else(unknown)?;
        Ok((block, position))
    }

    /// Index-wide statistics.
    pub async fn stats(&self) -> Result<IndexStats> {
        let (sources, blocks, chunks) = {
            let sources = self.sources.read().await;
            (
                sources.len(),
                sources.values().map(|s| s.document.block_count()).sum(),
                sources.values().map(|s| s.document.chunk_count()).sum(),
            )
        };

        Ok(IndexStats {
            sources,
            blocks,
            chunks,
            chunk_records: self.backend.count(Collection::Chunks, None).await?,
            block_records: self.backend.count(Collection::Blocks, None).await?,
            backend: self.backend.name().to_string(),
            sparse_scorer: self.sparse.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, ScoredRecord};
    use crate::chunker::{ChunkerConfig, HierarchicalChunker};
    use crate::embedder::{EmbedderConfig, MultiGranularEmbedder};
    use crate::sparse::Bm25Scorer;
    use async_trait::async_trait;
    use evidence_embeddings::{EmbeddingProvider, EmbeddingRequest, HashingProvider};
    use pretty_assertions::assert_eq;

    const TEXT: &str = "# Ownership\n\nEach value has exactly one owner at a time. When the owner goes out of scope the value is dropped. Moves transfer ownership between bindings.\n\n# Async\n\nFutures are polled by an executor. Tasks yield at await points.";

    fn chunker() -> HierarchicalChunker {
        HierarchicalChunker::new(ChunkerConfig::default().with_chunk_band(30, 45, 60))
    }

    async fn build(source: &str, text: &str) -> (HierarchicalDocument, DocumentEmbeddings) {
        let document = chunker().chunk(source, text);
        let embedder =
            MultiGranularEmbedder::new(Arc::new(HashingProvider::new(64)), EmbedderConfig::default());
        let embeddings = embedder.embed(&document).await;
        (document, embeddings)
    }

    fn index_with(backend: Arc<dyn VectorBackend>) -> HierarchicalIndex {
        HierarchicalIndex::new(backend, Arc::new(Bm25Scorer::default()), IndexConfig::default())
    }

    async fn indexed() -> HierarchicalIndex {
        let index = index_with(Arc::new(InMemoryBackend::new()));
        let (document, embeddings) = build("guide", TEXT).await;
        index.add(document, embeddings).await.unwrap();
        index
    }

    #[tokio::test]
    async fn test_vector_search_finds_matching_chunk() {
        let index = indexed().await;
        let query = HashingProvider::new(64).embed_text("Futures are polled by an executor.");

        let hits = index
            .search("guide", Collection::Chunks, &SearchQuery::Vector(query), 3)
            .await
            .unwrap();

        assert_eq!(hits[0].text.trim(), "Futures are polled by an executor.");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_text_search_over_blocks() {
        let index = indexed().await;
        let hits = index
            .search(
                "guide",
                Collection::Blocks,
                &SearchQuery::Text("executor await".to_string()),
                5,
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].block_position, 1);
        assert_eq!(hits[0].chunk_id, None);
    }

    #[tokio::test]
    async fn test_unknown_source_is_not_indexed() {
        let index = indexed().await;
        let err = index
            .search("other", Collection::Chunks, &SearchQuery::Text("x".to_string()), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::NotIndexed { .. }));
    }

    #[tokio::test]
    async fn test_reindex_replaces_previous_version() {
        let index = indexed().await;
        let (document, embeddings) = build("guide", "# Only\n\nA single short section.").await;

        let receipt = index.add(document, embeddings).await.unwrap();

        assert_eq!(receipt.version, 2);
        assert_eq!(receipt.replaced, Some(1));
        let stats = index.stats().await.unwrap();
        assert_eq!(stats.sources, 1);
        assert_eq!(stats.chunk_records, 1);
        assert_eq!(stats.block_records, 1);
    }

    #[tokio::test]
    async fn test_mismatched_embeddings_are_rejected() {
        let index = index_with(Arc::new(InMemoryBackend::new()));
        let (document, _) = build("guide", TEXT).await;
        let (_, other) = build("guide", "Different text.").await;

        let err = index.add(document, other).await.unwrap_err();
        assert!(matches!(err, HierarchyError::MismatchedEmbeddings { .. }));
        assert!(!index.is_indexed("guide").await);
    }

    #[tokio::test]
    async fn test_expand_neighbors_stays_in_block() {
        let index = indexed().await;
        let document = index.document("guide").await.unwrap();
        let first_block = &document.blocks()[0];
        assert!(first_block.chunks.len() >= 3);

        let middle = &first_block.chunks[1].id;
        let neighbors = index.expand_neighbors("guide", middle, 1).await.unwrap();
        let positions: Vec<usize> = neighbors.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);

        let last = first_block.chunks.last().unwrap();
        let neighbors = index.expand_neighbors("guide", &last.id, 5).await.unwrap();
        assert!(neighbors.iter().all(|c| c.block_id == first_block.id));
    }

    #[tokio::test]
    async fn test_expand_parent_and_block_chunks() {
        let index = indexed().await;
        let document = index.document("guide").await.unwrap();
        let chunk = &document.blocks()[1].chunks[0];

        let parent = index.expand_parent("guide", &chunk.id).await.unwrap();
        assert_eq!(parent.heading.as_deref(), Some("Async"));

        let chunks = index.block_chunks("guide", &parent.id).await.unwrap();
        assert_eq!(chunks, parent.chunks);

        let err = index
            .expand_parent("guide", &ChunkId::from("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::UnknownChunk { .. }));
    }

    #[tokio::test]
    async fn test_remove_source_deletes_records() {
        let index = indexed().await;
        assert!(index.remove_source("guide").await.unwrap());
        assert!(!index.remove_source("guide").await.unwrap());

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.sources, 0);
        assert_eq!(stats.chunk_records, 0);
        assert_eq!(stats.block_records, 0);
    }

    #[tokio::test]
    async fn test_contextualized_dense_vector() {
        let index = HierarchicalIndex::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(Bm25Scorer::default()),
            IndexConfig {
                dense_vector: DenseVector::Contextualized,
            },
        );
        let (document, embeddings) = build("guide", TEXT).await;
        let chunk = document.blocks()[1].chunks[0].id.clone();
        let blended = embeddings.contextualized[&chunk].clone();
        index.add(document, embeddings).await.unwrap();

        let hits = index
            .search("guide", Collection::Chunks, &SearchQuery::Vector(blended), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk_id, Some(chunk));
    }

    #[tokio::test]
    async fn test_readers_see_whole_versions_during_reindex() {
        let index = Arc::new(indexed().await);
        let provider = HashingProvider::new(64);
        let query = provider
            .embed(EmbeddingRequest::new("ownership"))
            .await
            .unwrap()
            .embedding;

        let writer = {
            let index = Arc::clone(&index);
            tokio::spawn(async move {
                for round in 0..5 {
                    let (document, embeddings) =
                        build("guide", &format!("{TEXT}\n\nRevision {round}.")).await;
                    index.add(document, embeddings).await.unwrap();
                }
            })
        };

        for _ in 0..20 {
            let snapshot = index.snapshot("guide").await.unwrap();
            let hits = index
                .search_snapshot(&snapshot, Collection::Chunks, &SearchQuery::Vector(query.clone()), 50)
                .await
                .unwrap();
            for hit in hits {
                let id = hit.chunk_id.unwrap();
                assert!(snapshot.document.chunk(&id).is_some());
            }
        }

        writer.await.unwrap();
        assert_eq!(index.snapshot("guide").await.unwrap().version, 6);
    }

    struct FailingBackend;

    #[async_trait]
    impl VectorBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        async fn upsert(&self, _: Collection, _: Vec<VectorRecord>) -> Result<usize> {
            Err(HierarchyError::Backend("disk full".to_string()))
        }

        async fn query(
            &self,
            _: Collection,
            _: &[f32],
            _: usize,
            _: &RecordFilter,
        ) -> Result<Vec<ScoredRecord>> {
            Err(HierarchyError::Backend("offline".to_string()))
        }

        async fn delete(&self, _: Collection, _: &RecordFilter) -> Result<usize> {
            Ok(0)
        }

        async fn count(&self, _: Collection, _: Option<&RecordFilter>) -> Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_failed_upsert_leaves_registry_untouched() {
        let index = index_with(Arc::new(FailingBackend));
        let (document, embeddings) = build("guide", TEXT).await;

        assert!(index.add(document, embeddings).await.is_err());
        assert!(!index.is_indexed("guide").await);
    }
}
