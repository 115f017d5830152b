//! Error types for the document hierarchy and its index.

use thiserror::Error;

/// Result type alias for hierarchy operations.
pub type Result<T> = std::result::Result<T, HierarchyError>;

/// Errors that can occur while indexing or querying documents.
#[derive(Error, Debug)]
pub enum HierarchyError {
    /// Nothing has been indexed under this source id.
    #[error("source not indexed: {source_id}")]
    NotIndexed { source_id: String },

    /// Chunk id not present in the indexed document.
    #[error("unknown chunk: {chunk_id}")]
    UnknownChunk { chunk_id: String },

    /// Block id not present in the indexed document.
    #[error("unknown block: {block_id}")]
    UnknownBlock { block_id: String },

    /// Embeddings were computed for a different document.
    #[error("embeddings belong to {actual}, expected {expected}")]
    MismatchedEmbeddings { expected: String, actual: String },

    /// Vector backend failure.
    #[error("vector backend error: {0}")]
    Backend(String),

    /// Sparse scorer failure.
    #[error("sparse scorer error: {0}")]
    Sparse(String),

    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] evidence_embeddings::EmbeddingError),
}
