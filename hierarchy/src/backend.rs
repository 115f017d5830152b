//! Vector backend seam.
//!
//! The index stores chunk and block vectors through a [`VectorBackend`].
//! Records are keyed by `{version}:{item_id}` so that two versions of the
//! same source can coexist while a re-index swaps one for the other.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use evidence_embeddings::{Embedding, SimilarityIndex};

use crate::document::{BlockId, BlockType};
use crate::error::Result;

/// The two logical collections of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Chunks,
    Blocks,
}

impl Collection {
    /// Both collections.
    pub const ALL: [Collection; 2] = [Collection::Chunks, Collection::Blocks];

    /// Collection name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chunks => "chunks",
            Self::Blocks => "blocks",
        }
    }
}

/// Metadata stored next to every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source_id: String,
    pub version: u64,

    /// Chunk or block id, without the version prefix.
    pub item_id: String,

    pub block_id: BlockId,
    pub block_position: usize,

    /// Position within the block; `None` for block records.
    pub chunk_position: Option<usize>,

    pub prev: Option<String>,
    pub next: Option<String>,
    pub heading: Option<String>,
    pub block_type: BlockType,
}

/// A record to upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub vector: Embedding,
    pub text: String,
    pub metadata: RecordMetadata,
}

impl VectorRecord {
    /// Storage key of the record.
    pub fn key(&self) -> String {
        record_key(self.metadata.version, &self.metadata.item_id)
    }
}

/// Storage key for an item of a given version.
pub fn record_key(version: u64, item_id: &str) -> String {
    format!("{version}:{item_id}")
}

/// Restricts queries and deletions to one source, optionally one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub source_id: String,
    pub version: Option<u64>,
}

impl RecordFilter {
    /// Match every version of `source_id`.
    pub fn source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            version: None,
        }
    }

    /// Restrict to a single version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Whether `metadata` passes the filter.
    pub fn matches(&self, metadata: &RecordMetadata) -> bool {
        metadata.source_id == self.source_id
            && self.version.is_none_or(|v| v == metadata.version)
    }
}

/// A query hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub score: f32,
    pub text: String,
    pub metadata: RecordMetadata,
}

/// Storage and k-NN search over vectors.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Backend name for diagnostics.
    fn name(&self) -> &str;

    /// Insert or replace records. Returns the number written.
    async fn upsert(&self, collection: Collection, records: Vec<VectorRecord>) -> Result<usize>;

    /// The `k` records most similar to `vector` among those matching `filter`.
    async fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<ScoredRecord>>;

    /// Delete matching records. Returns the number removed.
    async fn delete(&self, collection: Collection, filter: &RecordFilter) -> Result<usize>;

    /// Number of records, optionally restricted by `filter`.
    async fn count(&self, collection: Collection, filter: Option<&RecordFilter>) -> Result<usize>;

    /// Whether the backend can currently serve queries.
    fn is_available(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    text: String,
    metadata: RecordMetadata,
}

type Store = RwLock<Option<SimilarityIndex<StoredRecord>>>;

/// In-process backend built on [`SimilarityIndex`].
///
/// Each collection fixes its dimension on the first upsert.
#[derive(Default)]
pub struct InMemoryBackend {
    chunks: Store,
    blocks: Store,
}

impl InMemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, collection: Collection) -> &Store {
        match collection {
            Collection::Chunks => &self.chunks,
            Collection::Blocks => &self.blocks,
        }
    }
}

#[async_trait]
impl VectorBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn upsert(&self, collection: Collection, records: Vec<VectorRecord>) -> Result<usize> {
        let Some(dimension) = records.first().map(|r| r.vector.len()) else {
            return Ok(0);
        };

        let mut store = self.store(collection).write().await;
        let index = store.get_or_insert_with(|| SimilarityIndex::new(dimension));

        let written = records.len();
        for record in records {
            let key = record.key();
            index.add(
                key,
                record.vector,
                StoredRecord {
                    text: record.text,
                    metadata: record.metadata,
                },
            )?;
        }

        debug!("Upserted {written} records into {}", collection.as_str());
        Ok(written)
    }

    async fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<ScoredRecord>> {
        let store = self.store(collection).read().await;
        let Some(index) = store.as_ref() else {
            return Ok(Vec::new());
        };

        let hits = index.search_filtered(vector, k, -1.0, |record| filter.matches(&record.metadata))?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                index.get(&hit.id).map(|entry| ScoredRecord {
                    score: hit.score,
                    text: entry.metadata.text.clone(),
                    metadata: entry.metadata.metadata.clone(),
                })
            })
            .collect())
    }

    async fn delete(&self, collection: Collection, filter: &RecordFilter) -> Result<usize> {
        let mut store = self.store(collection).write().await;
        Ok(store
            .as_mut()
            .map_or(0, |index| index.remove_where(|record| filter.matches(&record.metadata))))
    }

    async fn count(&self, collection: Collection, filter: Option<&RecordFilter>) -> Result<usize> {
        let store = self.store(collection).read().await;
        let Some(index) = store.as_ref() else {
            return Ok(0);
        };
        Ok(match filter {
            None => index.len(),
            Some(filter) => index
                .ids()
                .into_iter()
                .filter_map(|id| index.get(id))
                .filter(|entry| filter.matches(&entry.metadata.metadata))
                .count(),
        })
    }
}
