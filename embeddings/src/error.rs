//! Embedding failures.
//!
//! A failed embedding never aborts ingestion or planning: callers record the
//! error against the chunk, block or facet it belongs to and carry on without
//! that vector.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbeddingError>;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The configured provider cannot be built, e.g. a remote provider
    /// without an API key.
    #[error("embedding provider not configured: {0}")]
    ProviderNotConfigured(String),

    /// The provider refused or failed a request.
    #[error("embedding request failed: {0}")]
    ApiRequest(String),

    /// The provider answered with a body that holds no usable vector.
    #[error("malformed embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding provider throttled, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A vector does not have the dimension of the index it is compared
    /// against.
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding transport: {0}")]
    Http(#[from] reqwest::Error),

    /// Chunk or query text above the provider's input limit.
    #[error("input of {length} characters exceeds the {max_length} character limit")]
    TextTooLong { length: usize, max_length: usize },
}
