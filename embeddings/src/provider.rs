//! Embedding providers.
//!
//! A provider turns text into a vector. Callers hold an
//! `Arc<dyn EmbeddingProvider>` and never branch on which implementation
//! sits behind it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::Embedding;
use crate::cache::{CachedProvider, EmbeddingCache};
use crate::error::{EmbeddingError, Result};
use crate::hashing::HashingProvider;

/// Request for generating embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Text to embed.
    pub text: String,

    /// Model to use (provider-specific).
    pub model: Option<String>,

    /// Dimensions for the output (if supported by provider).
    pub dimensions: Option<usize>,
}

impl EmbeddingRequest {
    /// Create a new embedding request.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
            dimensions: None,
        }
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the output dimensions.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

/// Response from embedding generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// The generated embedding.
    pub embedding: Embedding,

    /// Model used to generate the embedding.
    pub model: String,

    /// Dimension of the embedding.
    pub dimension: usize,

    /// Token usage (if available).
    pub tokens_used: Option<u64>,
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;

    /// Get the default embedding dimension.
    fn default_dimension(&self) -> usize;

    /// Generate an embedding for the given text.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Generate embeddings for multiple texts.
    ///
    /// The output has one response per request, in request order.
    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.embed(request).await?);
        }
        Ok(results)
    }

    /// Check if the provider can serve requests (API key set, etc.).
    fn is_available(&self) -> bool;
}

/// Which provider implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI embeddings API.
    #[serde(rename = "openai")]
    OpenAI,
    /// Feature-hashing bag of words, computed locally.
    Hashing,
    /// OpenAI when an API key is configured, hashing otherwise.
    #[default]
    Auto,
}

/// Configuration for the embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Which provider to use.
    pub kind: ProviderKind,

    /// API key for model-backed providers.
    pub api_key: Option<String>,

    /// Base URL override for the model-backed provider.
    pub base_url: Option<String>,

    /// Model to use for embeddings.
    pub model: Option<String>,

    /// Output dimension for the hashing provider.
    pub dimension: usize,

    /// Whether to wrap the provider in an in-memory cache.
    pub cache_enabled: bool,

    /// Maximum cache size.
    pub cache_max_entries: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Auto,
            api_key: None,
            base_url: None,
            model: None,
            dimension: crate::DEFAULT_DIMENSION,
            cache_enabled: true,
            cache_max_entries: 10_000,
        }
    }
}

impl ProviderConfig {
    /// Configuration for the local hashing provider.
    pub fn hashing(dimension: usize) -> Self {
        Self {
            kind: ProviderKind::Hashing,
            dimension,
            ..Self::default()
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the provider kind.
    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Enable or disable the embedding cache.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }
}

/// Build the provider described by `config`.
///
/// This is the single place where the model-backed versus heuristic decision
/// is made.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let use_openai = match config.kind {
        ProviderKind::OpenAI => {
            if config.api_key.is_none() {
                return Err(EmbeddingError::ProviderNotConfigured(
                    "openai provider requires an api key".to_string(),
                ));
            }
            true
        }
        ProviderKind::Hashing => false,
        ProviderKind::Auto => config.api_key.is_some(),
    };

    let provider: Arc<dyn EmbeddingProvider> = match (use_openai, config.api_key.as_deref()) {
        (true, Some(key)) => {
            let mut provider = OpenAIProvider::new(key);
            if let Some(url) = &config.base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(model) = &config.model {
                provider = provider.with_model(model);
            }
            wrap(provider, config)
        }
        _ => {
            if config.kind == ProviderKind::Auto {
                warn!("No embedding api key configured, using hashing provider");
            }
            wrap(HashingProvider::new(config.dimension), config)
        }
    };

    info!(
        "Embedding provider: {} ({})",
        provider.name(),
        provider.default_model()
    );
    Ok(provider)
}

fn wrap<P>(provider: P, config: &ProviderConfig) -> Arc<dyn EmbeddingProvider>
where
    P: EmbeddingProvider + 'static,
{
    if config.cache_enabled {
        Arc::new(CachedProvider::new(
            provider,
            EmbeddingCache::new(config.cache_max_entries),
        ))
    } else {
        Arc::new(provider)
    }
}

/// OpenAI embedding provider.
pub struct OpenAIProvider {
    /// API key.
    api_key: String,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Default model.
    default_model: String,

    /// Longest input accepted before the request is sent.
    max_input_chars: usize,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with an explicit API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            default_model: "text-embedding-3-small".to_string(),
            max_input_chars: 32_000,
        }
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the default model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn check_length(&self, text: &str) -> Result<()> {
        let length = text.chars().count();
        if length > self.max_input_chars {
            return Err(EmbeddingError::TextTooLong {
                length,
                max_length: self.max_input_chars,
            });
        }
        Ok(())
    }

    async fn post(&self, body: serde_json::Value) -> Result<OpenAIEmbeddingResponse> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(EmbeddingError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest(format!(
                "{status}: {error_text}"
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn default_dimension(&self) -> usize {
        match self.default_model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        self.check_length(&request.text)?;
        let model = request.model.unwrap_or_else(|| self.default_model.clone());

        debug!("Generating embedding with model: {model}");

        let mut body = serde_json::json!({
            "input": request.text,
            "model": model
        });
        if let Some(dims) = request.dimensions {
            body["dimensions"] = serde_json::json!(dims);
        }

        let result = self.post(body).await?;
        let tokens_used = result.usage.as_ref().map(|u| u.total_tokens);
        let embedding = result
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding in response".to_string()))?
            .embedding;

        Ok(EmbeddingResponse {
            dimension: embedding.len(),
            embedding,
            model: result.model,
            tokens_used,
        })
    }

    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let Some(first) = requests.first() else {
            return Ok(Vec::new());
        };
        let model = first
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        for request in &requests {
            self.check_length(&request.text)?;
        }
        let texts: Vec<&str> = requests.iter().map(|r| r.text.as_str()).collect();

        debug!(
            "Generating batch embeddings for {} texts with model: {model}",
            texts.len()
        );

        let result = self
            .post(serde_json::json!({
                "input": texts,
                "model": model
            }))
            .await?;

        if result.data.len() != requests.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                requests.len(),
                result.data.len()
            )));
        }

        // The API may return items out of order; `index` is authoritative.
        let mut data = result.data;
        data.sort_by_key(|item| item.index);

        let responses: Vec<EmbeddingResponse> = data
            .into_iter()
            .map(|item| EmbeddingResponse {
                dimension: item.embedding.len(),
                embedding: item.embedding,
                model: result.model.clone(),
                tokens_used: None,
            })
            .collect();

        info!("Generated {} batch embeddings", responses.len());

        Ok(responses)
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
    model: String,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_embedding_request() {
        let request = EmbeddingRequest::new("Hello world")
            .with_model("text-embedding-3-small")
            .with_dimensions(512);

        assert_eq!(request.text, "Hello world");
        assert_eq!(request.model, Some("text-embedding-3-small".to_string()));
        assert_eq!(request.dimensions, Some(512));
    }

    #[test]
    fn test_openai_provider_default_dimensions() {
        let provider = OpenAIProvider::new("key").with_model("text-embedding-3-large");
        assert_eq!(provider.default_dimension(), 3072);
    }

    #[test]
    fn test_build_provider_auto_without_key_is_hashing() {
        let provider = build_provider(&ProviderConfig::default()).unwrap();
        assert_eq!(provider.name(), "hashing");
    }

    #[test]
    fn test_build_provider_openai_requires_key() {
        let config = ProviderConfig::default().with_kind(ProviderKind::OpenAI);
        assert!(matches!(
            build_provider(&config),
            Err(EmbeddingError::ProviderNotConfigured(_))
        ));
    }

    #[test]
    fn test_build_provider_auto_with_key_is_openai() {
        let config = ProviderConfig::default()
            .with_api_key("sk-test")
            .with_cache(false);
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[tokio::test]
    async fn test_openai_embed_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }],
                "model": "text-embedding-3-small",
                "usage": { "prompt_tokens": 2, "total_tokens": 2 }
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("sk-test").with_base_url(server.uri());
        let response = provider.embed(EmbeddingRequest::new("hello")).await.unwrap();

        assert_eq!(response.embedding, vec![0.1, 0.2, 0.3]);
        assert_eq!(response.dimension, 3);
        assert_eq!(response.tokens_used, Some(2));
    }

    #[tokio::test]
    async fn test_openai_batch_restores_request_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "embedding": [0.0, 1.0], "index": 1 },
                    { "embedding": [1.0, 0.0], "index": 0 }
                ],
                "model": "text-embedding-3-small"
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("sk-test").with_base_url(server.uri());
        let responses = provider
            .embed_batch(vec![EmbeddingRequest::new("a"), EmbeddingRequest::new("b")])
            .await
            .unwrap();

        assert_eq!(responses[0].embedding, vec![1.0, 0.0]);
        assert_eq!(responses[1].embedding, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_openai_rate_limit_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("sk-test").with_base_url(server.uri());
        let err = provider
            .embed(EmbeddingRequest::new("hello"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EmbeddingError::RateLimited {
                retry_after_secs: 7
            }
        ));
    }
}
