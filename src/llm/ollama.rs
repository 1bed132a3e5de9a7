use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{LlmClient, LlmClientError, http_client, transport_error};

/// Completions from a local Ollama runtime via `POST /api/generate`.
#[derive(Debug, Clone)]
pub struct OllamaLlmClient {
    http: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    done: bool,
}

impl OllamaLlmClient {
    /// Construct a client for `model` at `base_url`, bounding each call by `timeout`.
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self, LlmClientError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url,
            model,
            timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for OllamaLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmClientError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0.1,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| transport_error(error, self.timeout, &self.base_url))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LlmClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404 (is model '{}' pulled?)",
                self.endpoint(),
                self.model
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|error| {
            if error.is_timeout() {
                LlmClientError::Timeout(self.timeout)
            } else {
                LlmClientError::InvalidResponse(format!(
                    "failed to decode Ollama response: {error}"
                ))
            }
        })?;

        if !body.done {
            return Err(LlmClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn returns_trimmed_completion() {
        let server = MockServer::start_async().await;
        let client =
            OllamaLlmClient::new(server.base_url(), "llama3.1".into(), Duration::from_secs(5))
                .expect("client");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"model": "llama3.1", "stream": false}"#);
                then.status(200).json_body(json!({
                    "response": "  Paris.  ",
                    "done": true
                }));
            })
            .await;

        let answer = client.complete("Where?").await.expect("answer");

        mock.assert_async().await;
        assert_eq!(answer, "Paris.");
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start_async().await;
        let client =
            OllamaLlmClient::new(server.base_url(), "llama3.1".into(), Duration::from_millis(100))
                .expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(json!({"response": "late", "done": true}));
            })
            .await;

        let error = client.complete("Where?").await.expect_err("timeout");
        assert!(matches!(error, LlmClientError::Timeout(_)));
    }

    #[tokio::test]
    async fn incomplete_response_is_invalid() {
        let server = MockServer::start_async().await;
        let client =
            OllamaLlmClient::new(server.base_url(), "llama3.1".into(), Duration::from_secs(5))
                .expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(json!({"response": "par", "done": false}));
            })
            .await;

        let error = client.complete("Where?").await.expect_err("incomplete");
        assert!(matches!(error, LlmClientError::InvalidResponse(_)));
    }
}
