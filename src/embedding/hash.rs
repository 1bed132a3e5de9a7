use async_trait::async_trait;

use super::{EmbeddingClient, EmbeddingClientError};

/// Deterministic offline embedder: hashes bytes into a fixed number of slots and L2-normalizes.
///
/// Identical text always maps to the identical vector, which makes it suitable for tests and
/// for running the pipeline without a model server.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    /// Construct a client producing vectors of `dimension` values.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        Ok(texts
            .iter()
            .map(|text| Self::encode(text, self.dimension))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_normalized_deterministic_vectors() {
        let client = HashEmbeddingClient::new(8);
        let first = client
            .generate_embeddings(vec!["hello world".into(), "other".into()])
            .await
            .expect("embeddings");
        let second = client
            .generate_embeddings(vec!["hello world".into()])
            .await
            .expect("embeddings");

        assert_eq!(first.len(), 2);
        assert_eq!(first[0], second[0]);
        let norm: f32 = first[0].iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn rejects_empty_batches_and_zero_dimension() {
        assert!(
            HashEmbeddingClient::new(8)
                .generate_embeddings(Vec::new())
                .await
                .is_err()
        );
        assert!(
            HashEmbeddingClient::new(0)
                .generate_embeddings(vec!["text".into()])
                .await
                .is_err()
        );
    }
}
