//! Embedding gateway: batch text-to-vector translation behind one trait.
//!
//! The same client instance is shared by ingestion, semantic chunking and query retrieval, so
//! it is passed around as `Arc<dyn EmbeddingClient + Send + Sync>`.

mod hash;
mod ollama;
mod openai;

pub use hash::HashEmbeddingClient;
pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub(crate) const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
pub(crate) const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider could not be reached.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider answered with a body that does not match the requested batch.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Client could not be built from the supplied settings.
    #[error("Invalid embedding client configuration: {0}")]
    Configuration(String),
}

/// Interface implemented by embedding backends.
///
/// Implementations return one vector per input, in input order, or fail the whole batch.
#[async_trait]
pub trait EmbeddingClient {
    /// Produce an embedding vector for each supplied chunk of text.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Build the embedding client selected by the configuration.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient + Send + Sync>, EmbeddingClientError> {
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Building embedding client"
    );
    let client: Arc<dyn EmbeddingClient + Send + Sync> = match config.embedding_provider {
        EmbeddingProvider::Hash => Arc::new(HashEmbeddingClient::new(config.embedding_dimension)),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            config.embedding_model.clone(),
            Some(config.embedding_dimension),
        )?),
        EmbeddingProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EmbeddingClientError::Configuration("OPENAI_API_KEY is not set".to_string())
            })?;
            Arc::new(OpenAiEmbeddingClient::new(
                config
                    .openai_base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
                api_key,
                config.embedding_model.clone(),
                Some(config.embedding_dimension),
            )?)
        }
    };
    Ok(client)
}

/// Check that a provider returned exactly one vector of the expected size per input.
pub(crate) fn validate_batch(
    embeddings: &[Vec<f32>],
    expected: usize,
    dimension: Option<usize>,
) -> Result<(), EmbeddingClientError> {
    if embeddings.len() != expected {
        return Err(EmbeddingClientError::InvalidResponse(format!(
            "expected {expected} embeddings, received {}",
            embeddings.len()
        )));
    }
    if let Some(dimension) = dimension
        && let Some(vector) = embeddings.iter().find(|vector| vector.len() != dimension)
    {
        return Err(EmbeddingClientError::InvalidResponse(format!(
            "expected dimension {dimension}, received {}",
            vector.len()
        )));
    }
    Ok(())
}
