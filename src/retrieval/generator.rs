//! Answer generation on top of the retriever.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::retriever::RagRetriever;
use super::types::{
    QueryRequest, RequestStage, RetrievalError, RetrievalMetrics, RetrievalResult,
    RetrievedChunk, StageTracker,
};
use crate::llm::{LlmClient, LlmClientError};
use crate::store::MetadataFilter;

const PROMPT_PREAMBLE: &str = "You are a helpful assistant that provides accurate information \
based on the provided context. If the answer is not contained within the context, say \
\"I don't know\" rather than making up an answer.";

/// Render the answer prompt for `query` over `context`.
pub fn render_prompt(query: &str, context: &str) -> String {
    format!("{PROMPT_PREAMBLE}\n\nContext:\n{context}\n\nQuestion: {query}\n\nAnswer:")
}

/// Cumulative timings for one answered query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationMetrics {
    /// Wall time from request to answer.
    pub total_time_ms: u64,
    /// Time spent retrieving context.
    pub retrieval_time_ms: u64,
    /// Time spent waiting for the language model.
    pub generation_time_ms: u64,
    /// Number of supporting chunks.
    pub total_documents: usize,
    /// Detailed retrieval metrics.
    pub retrieval: RetrievalMetrics,
}

/// Answer plus the chunks and context it was generated from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    /// Query that was answered.
    pub query: String,
    /// Model answer.
    pub answer: String,
    /// Supporting chunks, most relevant first.
    pub documents: Vec<RetrievedChunk>,
    /// Context passed to the model.
    pub context: String,
    /// Timings.
    pub metrics: GenerationMetrics,
}

/// The language model failed after retrieval succeeded. Carries the retrieval so generation
/// can be retried alone with [`RagGenerator::answer`].
#[derive(Debug, Error)]
#[error("Failed to generate answer after {elapsed_ms} ms: {source}")]
pub struct GenerationError {
    /// Underlying provider failure.
    #[source]
    pub source: LlmClientError,
    /// Retrieval the prompt was built from.
    pub retrieval: Box<RetrievalResult>,
    /// Time spent before the failure.
    pub elapsed_ms: u64,
}

/// Failure of a full query, tagged by the pipeline half that failed.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Retrieval failed; nothing was sent to the model.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// Retrieval succeeded but generation failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl QueryError {
    /// Stage the request was in when it failed.
    pub fn stage(&self) -> RequestStage {
        match self {
            Self::Retrieval(RetrievalError::InvalidRequest(_)) => RequestStage::Received,
            Self::Retrieval(RetrievalError::QueryEmbedding(_)) => RequestStage::EmbeddingQuery,
            Self::Retrieval(RetrievalError::AllCollectionsFailed { .. }) => RequestStage::Searching,
            Self::Generation(_) => RequestStage::PromptingLlm,
        }
    }
}

/// Retrieves context for a query and asks the language model to answer from it.
#[derive(Clone)]
pub struct RagGenerator {
    retriever: RagRetriever,
    llm: Arc<dyn LlmClient>,
    llm_timeout: Duration,
}

impl RagGenerator {
    /// Build a generator; `llm_timeout` bounds every completion call.
    pub fn new(retriever: RagRetriever, llm: Arc<dyn LlmClient>, llm_timeout: Duration) -> Self {
        Self {
            retriever,
            llm,
            llm_timeout,
        }
    }

    /// Retriever used for context.
    pub fn retriever(&self) -> &RagRetriever {
        &self.retriever
    }

    /// Answer `query` using the configured default `top_k`.
    pub async fn generate_response(
        &self,
        query: &str,
        collection_names: &[String],
        filter: Option<&MetadataFilter>,
        document_ids: &[String],
    ) -> Result<GenerationResult, QueryError> {
        let started = Instant::now();
        let top_k = self.retriever.settings().default_top_k;
        let retrieval = self
            .retriever
            .retrieve_for_rag(query, collection_names, filter, document_ids, top_k)
            .await?;
        Ok(self.answer_from(retrieval, started).await?)
    }

    /// Answer a JSON-level request. An explicit `top_k` overrides the default.
    pub async fn generate(&self, request: &QueryRequest) -> Result<GenerationResult, QueryError> {
        let started = Instant::now();
        let retrieval = self.retriever.retrieve(request).await?;
        Ok(self.answer_from(retrieval, started).await?)
    }

    /// Run only the generation half over an existing retrieval.
    pub async fn answer(
        &self,
        retrieval: RetrievalResult,
    ) -> Result<GenerationResult, GenerationError> {
        self.answer_from(retrieval, Instant::now()).await
    }

    async fn answer_from(
        &self,
        retrieval: RetrievalResult,
        started: Instant,
    ) -> Result<GenerationResult, GenerationError> {
        let mut stage = StageTracker::start_at(RequestStage::ContextAssembled);
        let prompt = render_prompt(&retrieval.query, &retrieval.context);

        stage.advance(RequestStage::PromptingLlm);
        let generation_started = Instant::now();
        let completion = tokio::time::timeout(self.llm_timeout, self.llm.complete(&prompt))
            .await
            .unwrap_or(Err(LlmClientError::Timeout(self.llm_timeout)));
        let generation_time_ms = elapsed_ms(generation_started);

        let answer = match completion {
            Ok(answer) => answer.trim().to_string(),
            Err(source) => {
                tracing::error!(
                    stage = %stage.stage(),
                    error = %source,
                    documents = retrieval.documents.len(),
                    "Generation failed"
                );
                stage.advance(RequestStage::Errored);
                return Err(GenerationError {
                    source,
                    retrieval: Box::new(retrieval),
                    elapsed_ms: elapsed_ms(started),
                });
            }
        };
        stage.advance(RequestStage::Answered);

        let metrics = GenerationMetrics {
            total_time_ms: elapsed_ms(started),
            retrieval_time_ms: retrieval.metrics.retrieval_time_ms,
            generation_time_ms,
            total_documents: retrieval.documents.len(),
            retrieval: retrieval.metrics,
        };
        tracing::info!(
            target: "docrag::query_log",
            query = %retrieval.query,
            retrieval_ms = metrics.retrieval_time_ms,
            generation_ms = metrics.generation_time_ms,
            total_ms = metrics.total_time_ms,
            documents = metrics.total_documents,
            "Query answered"
        );

        Ok(GenerationResult {
            query: retrieval.query,
            answer,
            documents: retrieval.documents,
            context: retrieval.context,
            metrics,
        })
    }
}

impl std::fmt::Debug for RagGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagGenerator")
            .field("retriever", &self.retriever)
            .field("llm_timeout", &self.llm_timeout)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::whitespace_token_counter;
    use crate::embedding::{EmbeddingClient, EmbeddingClientError};
    use crate::retrieval::RetrieverSettings;
    use crate::store::{InMemoryVectorStore, VectorPoint, VectorStore};
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[derive(Default)]
    struct RecordingLlm {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn complete(&self, prompt: &str) -> Result<String, LlmClientError> {
            self.prompts
                .lock()
                .expect("prompt log")
                .push(prompt.to_string());
            Ok("  Revenue grew 12%.  ".to_string())
        }
    }

    struct StalledLlm;

    #[async_trait]
    impl LlmClient for StalledLlm {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmClientError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    async fn seeded_retriever(default_top_k: usize) -> RagRetriever {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("documents", 2).await.expect("collection");
        let points = (0..3u64)
            .map(|index| {
                let mut metadata = Map::new();
                metadata.insert("document_id".into(), json!("report"));
                metadata.insert("chunk_index".into(), json!(index));
                metadata.insert("filename".into(), json!("q3.txt"));
                VectorPoint {
                    id: format!("p{index}"),
                    vector: vec![1.0, index as f32 * 0.1],
                    content: format!("Chunk {index} of the report."),
                    metadata,
                }
            })
            .collect();
        store.upsert("documents", points).await.expect("upsert");
        RagRetriever::new(
            Arc::new(FixedEmbedder),
            Arc::new(store),
            RetrieverSettings {
                collections: vec!["documents".to_string()],
                default_top_k,
                ..RetrieverSettings::default()
            },
        )
        .with_token_counter(whitespace_token_counter())
    }

    #[test]
    fn prompt_places_context_before_question() {
        let prompt = render_prompt("What grew?", "[Source: a]\nRevenue grew.");
        assert!(prompt.starts_with("You are a helpful assistant"));
        assert!(prompt.contains("say \"I don't know\""));
        assert!(prompt.ends_with(
            "Context:\n[Source: a]\nRevenue grew.\n\nQuestion: What grew?\n\nAnswer:"
        ));
    }

    #[tokio::test]
    async fn answers_with_supporting_chunks() {
        let llm = Arc::new(RecordingLlm::default());
        let generator = RagGenerator::new(
            seeded_retriever(2).await,
            llm.clone(),
            Duration::from_secs(1),
        );

        let result = generator
            .generate_response("How did revenue change?", &[], None, &[])
            .await
            .expect("answer");

        assert_eq!(result.answer, "Revenue grew 12%.");
        assert_eq!(result.documents.len(), 2);
        assert_eq!(result.metrics.total_documents, 2);
        assert!(result.context.starts_with("[Source: q3.txt]\n"));
        let prompts = llm.prompts.lock().expect("prompt log");
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains(&result.context));
    }

    #[tokio::test]
    async fn explicit_top_k_overrides_default() {
        let generator = RagGenerator::new(
            seeded_retriever(1).await,
            Arc::new(RecordingLlm::default()),
            Duration::from_secs(1),
        );
        let result = generator
            .generate(&QueryRequest::new("q").with_top_k(3))
            .await
            .expect("answer");
        assert_eq!(result.documents.len(), 3);
    }

    #[tokio::test]
    async fn empty_retrieval_still_prompts_the_model() {
        let llm = Arc::new(RecordingLlm::default());
        let generator = RagGenerator::new(
            seeded_retriever(2).await,
            llm.clone(),
            Duration::from_secs(1),
        );
        let result = generator
            .generate(&QueryRequest::new("q").with_document_ids(["missing"]))
            .await
            .expect("answer");
        assert!(result.documents.is_empty());
        assert!(result.context.is_empty());
        assert_eq!(llm.prompts.lock().expect("prompt log").len(), 1);
    }

    #[tokio::test]
    async fn timeout_returns_retrieval_for_retry() {
        let generator = RagGenerator::new(
            seeded_retriever(2).await,
            Arc::new(StalledLlm),
            Duration::from_millis(50),
        );
        let error = generator
            .generate(&QueryRequest::new("q"))
            .await
            .expect_err("timeout");

        assert_eq!(error.stage(), RequestStage::PromptingLlm);
        let QueryError::Generation(failure) = error else {
            panic!("expected generation error");
        };
        assert!(matches!(failure.source, LlmClientError::Timeout(_)));
        assert_eq!(failure.retrieval.documents.len(), 2);
    }
}
