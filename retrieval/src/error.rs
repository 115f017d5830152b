//! Error types for the evidence engine.

use thiserror::Error;

use evidence_hierarchy::HierarchyError;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur in the evidence engine.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Nothing has been ingested under this source id.
    #[error("source not indexed: {source_id}")]
    NotIndexed { source_id: String },

    /// Index error.
    #[error("index error: {0}")]
    Hierarchy(HierarchyError),

    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] evidence_embeddings::EmbeddingError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A pipeline task failed or was aborted.
    #[error("task error: {0}")]
    Task(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HierarchyError> for RetrievalError {
    fn from(err: HierarchyError) -> Self {
        match err {
            HierarchyError::NotIndexed { source_id } => Self::NotIndexed { source_id },
            other => Self::Hierarchy(other),
        }
    }
}

impl From<anyhow::Error> for RetrievalError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<RetrievalError>() {
            Ok(err) => err,
            Err(err) => Self::Task(format!("{err:#}")),
        }
    }
}
