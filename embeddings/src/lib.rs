//! # Embeddings
//!
//! Text-to-vector capability and vector similarity for the evidence
//! retrieval engine.
//!
//! ## Features
//!
//! - **Embedding Providers**: a single [`EmbeddingProvider`] capability with a
//!   model-backed implementation ([`OpenAIProvider`]) and a heuristic one
//!   ([`HashingProvider`]) that needs no network access
//! - **Similarity**: cosine similarity, normalization and weighted blends
//! - **Similarity Index**: an in-memory k-NN store with filtered search
//! - **Caching**: a provider wrapper that memoizes repeated texts
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ProviderConfig ──► build_provider ──► Arc<dyn EmbeddingProvider>│
//! │                          │                    │                 │
//! │                          ▼                    ▼                 │
//! │              OpenAI / Hashing          CachedProvider           │
//! │                                                                 │
//! │  Embedding ──► similarity ──► SimilarityIndex<M>                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The provider is chosen once, at construction. Code downstream of
//! [`build_provider`] never asks whether a model is available.

pub mod cache;
pub mod error;
pub mod hashing;
pub mod index;
pub mod provider;
pub mod similarity;

pub use cache::{CachedProvider, EmbeddingCache};
pub use error::{EmbeddingError, Result};
pub use hashing::HashingProvider;
pub use index::{IndexEntry, SimilarityIndex};
pub use provider::{
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, OpenAIProvider, ProviderConfig,
    ProviderKind, build_provider,
};
pub use similarity::{SimilarityResult, cosine_similarity, normalize};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of embeddings produced by the heuristic provider.
pub const DEFAULT_DIMENSION: usize = 256;
