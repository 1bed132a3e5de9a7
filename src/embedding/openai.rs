use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{EmbeddingClient, EmbeddingClientError, validate_batch};

/// Embeddings from an OpenAI-compatible `POST /embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingClient {
    /// Construct a client. `base_url` includes the API version prefix, e.g.
    /// `https://api.openai.com/v1`.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        dimension: Option<usize>,
    ) -> Result<Self, EmbeddingClientError> {
        let http = Client::builder()
            .user_agent("docrag/embedding")
            .build()
            .map_err(|error| EmbeddingClientError::Configuration(error.to_string()))?;
        Ok(Self {
            http,
            base_url,
            api_key,
            model,
            dimension,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let payload = json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "embeddings endpoint returned {status}: {body}"
            )));
        }

        let mut body: EmbeddingsResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode embeddings response: {error}"
            ))
        })?;

        body.data.sort_by_key(|item| item.index);
        let embeddings: Vec<Vec<f32>> = body.data.into_iter().map(|item| item.embedding).collect();
        validate_batch(&embeddings, expected, self.dimension)?;
        Ok(embeddings)
    }
}
