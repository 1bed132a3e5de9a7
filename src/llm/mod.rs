//! LLM gateway: prompt in, completion text out.
//!
//! Both HTTP clients issue non-streaming requests directly against the provider. Timeouts are
//! enforced by the HTTP client and reported as [`LlmClientError::Timeout`] so callers can tell a
//! slow provider apart from a failing one.

mod ollama;
mod openai;

pub use ollama::OllamaLlmClient;
pub use openai::OpenAiLlmClient;

use crate::config::{Config, LlmProvider};
use crate::embedding::{DEFAULT_OLLAMA_URL, DEFAULT_OPENAI_URL};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while asking a language model for a completion.
#[derive(Debug, Error)]
pub enum LlmClientError {
    /// Provider did not answer within the configured timeout.
    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),
    /// Provider was unreachable or misconfigured.
    #[error("LLM provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by completion providers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete `prompt` and return the model's answer text.
    async fn complete(&self, prompt: &str) -> Result<String, LlmClientError>;
}

/// Build the completion client selected by the configuration.
pub fn build_llm_client(config: &Config) -> Result<Arc<dyn LlmClient>, LlmClientError> {
    let timeout = Duration::from_secs(config.llm_timeout_secs);
    let client: Arc<dyn LlmClient> = match config.llm_provider {
        LlmProvider::Ollama => Arc::new(OllamaLlmClient::new(
            config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            config.llm_model.clone(),
            timeout,
        )?),
        LlmProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                LlmClientError::ProviderUnavailable("OPENAI_API_KEY is not set".to_string())
            })?;
            Arc::new(OpenAiLlmClient::new(
                config
                    .openai_base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
                api_key,
                config.llm_model.clone(),
                timeout,
            )?)
        }
    };
    Ok(client)
}

pub(crate) fn transport_error(
    error: reqwest::Error,
    timeout: Duration,
    target: &str,
) -> LlmClientError {
    if error.is_timeout() {
        LlmClientError::Timeout(timeout)
    } else {
        LlmClientError::ProviderUnavailable(format!("failed to reach {target}: {error}"))
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, LlmClientError> {
    reqwest::Client::builder()
        .user_agent("docrag/llm")
        .timeout(timeout)
        .build()
        .map_err(|error| LlmClientError::ProviderUnavailable(error.to_string()))
}
