use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{EmbeddingClient, EmbeddingClientError, validate_batch};

/// Embeddings from a local Ollama runtime via `POST /api/embed`.
#[derive(Debug, Clone)]
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    dimension: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddingClient {
    /// Construct a client for `model` served at `base_url`. When `dimension` is set, responses
    /// with other vector sizes are rejected.
    pub fn new(
        base_url: String,
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
            model,
            dimension,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
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
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EmbeddingClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404 (is model '{}' pulled?)",
                self.endpoint(),
                self.model
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: EmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        validate_batch(&body.embeddings, expected, self.dimension)?;
        tracing::debug!(model = %self.model, count = expected, "Generated Ollama embeddings");
        Ok(body.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn posts_batch_and_returns_vectors_in_order() {
        let server = MockServer::start_async().await;
        let client = OllamaEmbeddingClient::new(server.base_url(), "nomic".into(), Some(2))
            .expect("client");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embed")
                    .json_body(json!({"model": "nomic", "input": ["a", "b"]}));
                then.status(200)
                    .json_body(json!({"embeddings": [[1.0, 0.0], [0.0, 1.0]]}));
            })
            .await;

        let vectors = client
            .generate_embeddings(vec!["a".into(), "b".into()])
            .await
            .expect("embeddings");

        mock.assert_async().await;
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_invalid() {
        let server = MockServer::start_async().await;
        let client = OllamaEmbeddingClient::new(server.base_url(), "nomic".into(), Some(3))
            .expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({"embeddings": [[1.0, 0.0]]}));
            })
            .await;

        let error = client
            .generate_embeddings(vec!["a".into()])
            .await
            .expect_err("mismatch");
        assert!(matches!(error, EmbeddingClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn error_status_is_generation_failure() {
        let server = MockServer::start_async().await;
        let client =
            OllamaEmbeddingClient::new(server.base_url(), "nomic".into(), None).expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(500).body("boom");
            })
            .await;

        let error = client
            .generate_embeddings(vec!["a".into()])
            .await
            .expect_err("error response");
        let EmbeddingClientError::GenerationFailed(message) = error else {
            panic!("expected generation failure, got {error:?}");
        };
        assert!(message.contains("500"));
    }
}
