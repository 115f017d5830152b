//! # Document Hierarchy
//!
//! Turns raw text into a two-level structure and indexes it for retrieval.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Document Hierarchy                       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  text ──► HierarchicalChunker ──► HierarchicalDocument          │
//! │                                     │  Block ─┬─ Chunk          │
//! │                                     │         └─ Chunk          │
//! │                                     ▼                           │
//! │                          MultiGranularEmbedder                  │
//! │                                     │  DocumentEmbeddings       │
//! │                                     ▼                           │
//! │                           HierarchicalIndex                     │
//! │                    ┌────────────────┴────────────────┐          │
//! │              VectorBackend                     SparseScorer     │
//! │           (chunks / blocks k-NN)             (BM25 over texts)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use evidence_embeddings::HashingProvider;
//! use evidence_hierarchy::*;
//!
//! let document = HierarchicalChunker::default().chunk("guide", text);
//! let embedder = MultiGranularEmbedder::new(
//!     Arc::new(HashingProvider::default()),
//!     EmbedderConfig::default(),
//! );
//! let embeddings = embedder.embed(&document).await;
//!
//! let index = HierarchicalIndex::new(
//!     Arc::new(InMemoryBackend::new()),
//!     Arc::new(Bm25Scorer::default()),
//!     IndexConfig::default(),
//! );
//! index.add(document, embeddings).await?;
//! ```

pub mod backend;
pub mod chunker;
pub mod document;
pub mod embedder;
pub mod error;
pub mod index;
pub mod sparse;
pub mod text;

pub use backend::{
    Collection, InMemoryBackend, RecordFilter, RecordMetadata, ScoredRecord, VectorBackend,
    VectorRecord,
};
pub use chunker::{ChunkerConfig, HierarchicalChunker};
pub use document::{Block, BlockId, BlockType, Chunk, ChunkId, HierarchicalDocument};
pub use embedder::{
    DocumentEmbeddings, EmbedderConfig, EmbeddingFailure, EmbeddingTarget, MultiGranularEmbedder,
};
pub use error::{HierarchyError, Result};
pub use index::{
    DenseVector, HierarchicalIndex, IndexConfig, IndexReceipt, IndexStats, IndexedSource,
    RetrievalHit, SearchQuery,
};
pub use sparse::{Bm25Scorer, SparseCorpus, SparseScorer};
