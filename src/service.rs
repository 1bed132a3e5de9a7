//! Wiring of the ingestion and query pipelines behind one shareable service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::chunking::{
    Chunker, ChunkingConfig, ChunkingSettings, ConfigurationError, TokenizerError,
    build_token_counter,
};
use crate::config::Config;
use crate::embedding::{EmbeddingClient, EmbeddingClientError, build_embedding_client};
use crate::ingest::{
    ChunkRecord, CollectionRouting, Document, DocumentRepository, InMemoryDocumentRepository,
    IngestError, IngestOutcome, IngestionService, NewDocument,
};
use crate::llm::{LlmClient, LlmClientError, build_llm_client};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::qdrant::{QdrantError, QdrantService};
use crate::retrieval::{
    GenerationResult, MergeMode, QueryError, QueryRequest, RagGenerator, RagRetriever,
    RetrievalError, RetrievalResult, RetrieverSettings,
};
use crate::store::{VectorStore, VectorStoreError};

/// Abstraction over the pipelines used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait RagApi: Send + Sync {
    /// Retrieve ranked context for a query.
    async fn retrieve(&self, request: QueryRequest) -> Result<RetrievalResult, RetrievalError>;

    /// Retrieve context and answer the query from it.
    async fn generate(&self, request: QueryRequest) -> Result<GenerationResult, QueryError>;

    /// Register a document and index its text.
    async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse, IngestError>;

    /// Delete a document together with its chunks and vector points.
    async fn delete_document(&self, document_id: &str) -> Result<Document, IngestError>;

    /// Registered documents ordered by id.
    async fn list_documents(&self, page: PageRequest) -> Result<Vec<Document>, IngestError>;

    /// One registered document.
    async fn get_document(&self, document_id: &str) -> Result<Document, IngestError>;

    /// Stored chunk rows of a document ordered by index.
    async fn document_chunks(
        &self,
        document_id: &str,
        page: PageRequest,
    ) -> Result<Vec<ChunkRecord>, IngestError>;

    /// Reachability of the document repository and the vector store.
    async fn health(&self) -> HealthReport;

    /// Enumerate collections in the vector store.
    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError>;

    /// Current pipeline counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Body of an ingestion request: document fields, extracted text and optional chunking overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Document registration fields.
    #[serde(flatten)]
    pub document: NewDocument,
    /// Raw text emitted by the document parser.
    pub text: String,
    /// Chunking overrides; the configured defaults apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunking: Option<ChunkingSettings>,
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestResponse {
    /// Document record after indexing.
    pub document: Document,
    /// Indexing summary.
    pub outcome: IngestOutcome,
}

const DEFAULT_PAGE_LIMIT: usize = 100;

/// Offset pagination for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Entries to skip.
    #[serde(default)]
    pub skip: usize,
    /// Maximum entries to return.
    #[serde(default = "default_page_limit")]
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    fn apply<T>(self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.skip).take(self.limit).collect()
    }
}

fn default_page_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

/// Health of one dependency or of the whole service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Reachable.
    Ok,
    /// Unreachable or failing.
    Error,
}

/// Result of probing one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Probe outcome.
    pub status: HealthStatus,
    /// Detail for operators.
    pub message: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `error` as soon as one component fails.
    pub status: HealthStatus,
    /// Per-component outcome keyed by component name.
    pub services: BTreeMap<String, ComponentHealth>,
}

impl HealthReport {
    /// Aggregate component results.
    pub fn from_components(services: BTreeMap<String, ComponentHealth>) -> Self {
        let status = if services
            .values()
            .all(|component| component.status == HealthStatus::Ok)
        {
            HealthStatus::Ok
        } else {
            HealthStatus::Error
        };
        Self { status, services }
    }
}

/// Errors raised while building a [`RagService`] from configuration.
#[derive(Debug, Error)]
pub enum ServiceInitError {
    /// Embedding client could not be built.
    #[error("Failed to initialize embedding client: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// LLM client could not be built.
    #[error("Failed to initialize LLM client: {0}")]
    Llm(#[from] LlmClientError),
    /// Qdrant client could not be built.
    #[error("Failed to initialize Qdrant client: {0}")]
    Qdrant(#[from] QdrantError),
    /// A configured collection could not be ensured.
    #[error("Failed to prepare collection '{collection}': {source}")]
    Collection {
        /// Collection name.
        collection: String,
        /// Store failure.
        #[source]
        source: VectorStoreError,
    },
    /// Chunking defaults are invalid.
    #[error(transparent)]
    Chunking(#[from] ConfigurationError),
    /// Tokenizer for the embedding model is unavailable.
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
}

/// Values the service needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct RagSettings {
    /// Retriever settings.
    pub retriever: RetrieverSettings,
    /// Bound on every LLM call.
    pub llm_timeout: Duration,
    /// Vector size of every collection.
    pub embedding_dimension: usize,
    /// Chunking used when an ingestion request has no overrides.
    pub chunking: ChunkingConfig,
    /// Collection routing for new documents.
    pub routing: CollectionRouting,
}

/// Long-lived handles shared by the HTTP surface and the CLI.
///
/// Construct once near process start and share it through an `Arc`.
pub struct RagService {
    generator: RagGenerator,
    ingestion: IngestionService,
    store: Arc<dyn VectorStore>,
    metrics: Arc<PipelineMetrics>,
    default_chunking: ChunkingConfig,
}

impl RagService {
    /// Assemble a service from explicit collaborators.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient + Send + Sync>,
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn LlmClient>,
        repository: Arc<dyn DocumentRepository>,
        chunker: Chunker,
        settings: RagSettings,
    ) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let retriever = RagRetriever::new(embedder.clone(), store.clone(), settings.retriever);
        let generator = RagGenerator::new(retriever, llm, settings.llm_timeout);
        let ingestion = IngestionService::new(
            chunker,
            embedder,
            store.clone(),
            repository,
            metrics.clone(),
            settings.embedding_dimension,
        )
        .with_routing(settings.routing);
        Self {
            generator,
            ingestion,
            store,
            metrics,
            default_chunking: settings.chunking,
        }
    }

    /// Build the production service: configured providers, Qdrant, and an in-memory repository.
    ///
    /// Every configured collection is created when missing.
    pub async fn from_config(config: &Config) -> Result<Self, ServiceInitError> {
        tracing::info!("Initializing embedding client");
        let embedder = build_embedding_client(config)?;
        let llm = build_llm_client(config)?;
        let qdrant = Arc::new(QdrantService::new(
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
        )?);
        for collection in &config.collections {
            tracing::debug!(
                collection = %collection,
                vector_size = config.embedding_dimension,
                "Ensuring collection"
            );
            qdrant
                .ensure_collection(collection, config.embedding_dimension)
                .await
                .map_err(|source| ServiceInitError::Collection {
                    collection: collection.clone(),
                    source,
                })?;
        }

        let token_counter =
            build_token_counter(config.embedding_provider, &config.embedding_model)?;
        let chunker = Chunker::new(embedder.clone()).with_token_counter(token_counter);
        let settings = RagSettings {
            retriever: RetrieverSettings {
                collections: config.collections.clone(),
                default_top_k: config.max_retrieved_documents,
                max_context_tokens: config.max_context_tokens,
                search_timeout: Duration::from_millis(config.search_timeout_ms),
                merge_mode: MergeMode::Global,
            },
            llm_timeout: Duration::from_secs(config.llm_timeout_secs),
            embedding_dimension: config.embedding_dimension,
            chunking: config.chunking_config()?,
            routing: routing_for(config),
        };
        tracing::info!(collections = ?config.collections, "RAG service initialized");

        Ok(Self::new(
            embedder,
            qdrant,
            llm,
            Arc::new(InMemoryDocumentRepository::new()),
            chunker,
            settings,
        ))
    }

    /// Ingestion pipeline.
    pub fn ingestion(&self) -> &IngestionService {
        &self.ingestion
    }

    /// Query pipeline.
    pub fn generator(&self) -> &RagGenerator {
        &self.generator
    }

    fn record_retrieval(&self, result: &RetrievalResult) {
        self.metrics
            .record_retrieval(result.metrics.failed_collections.len());
    }
}

#[async_trait]
impl RagApi for RagService {
    async fn retrieve(&self, request: QueryRequest) -> Result<RetrievalResult, RetrievalError> {
        match self.generator.retriever().retrieve(&request).await {
            Ok(result) => {
                self.record_retrieval(&result);
                Ok(result)
            }
            Err(error) => {
                self.metrics.record_retrieval_failure();
                Err(error)
            }
        }
    }

    async fn generate(&self, request: QueryRequest) -> Result<GenerationResult, QueryError> {
        match self.generator.generate(&request).await {
            Ok(result) => {
                self.metrics
                    .record_retrieval(result.metrics.retrieval.failed_collections.len());
                self.metrics.record_generation();
                Ok(result)
            }
            Err(QueryError::Retrieval(error)) => {
                self.metrics.record_retrieval_failure();
                Err(QueryError::Retrieval(error))
            }
            Err(QueryError::Generation(error)) => {
                self.record_retrieval(&error.retrieval);
                self.metrics.record_generation_failure();
                Err(QueryError::Generation(error))
            }
        }
    }

    async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse, IngestError> {
        let config = match request.chunking {
            Some(settings) => ChunkingConfig::try_from(settings)?,
            None => self.default_chunking.clone(),
        };
        let registered = self.ingestion.register_document(request.document).await?;
        let outcome = self
            .ingestion
            .chunk_and_index(&registered.id, &request.text, &config)
            .await?;
        let document = self.ingestion.repository().get(&registered.id).await?;
        Ok(IngestResponse { document, outcome })
    }

    async fn delete_document(&self, document_id: &str) -> Result<Document, IngestError> {
        self.ingestion.delete_document(document_id).await
    }

    async fn list_documents(&self, page: PageRequest) -> Result<Vec<Document>, IngestError> {
        let documents = self.ingestion.repository().list().await?;
        Ok(page.apply(documents))
    }

    async fn get_document(&self, document_id: &str) -> Result<Document, IngestError> {
        Ok(self.ingestion.repository().get(document_id).await?)
    }

    async fn document_chunks(
        &self,
        document_id: &str,
        page: PageRequest,
    ) -> Result<Vec<ChunkRecord>, IngestError> {
        let chunks = self.ingestion.repository().chunks(document_id).await?;
        Ok(page.apply(chunks))
    }

    async fn health(&self) -> HealthReport {
        let mut services = BTreeMap::new();
        let repository = match self.ingestion.repository().list().await {
            Ok(documents) => ComponentHealth {
                status: HealthStatus::Ok,
                message: format!("{} document(s) registered", documents.len()),
            },
            Err(error) => ComponentHealth {
                status: HealthStatus::Error,
                message: error.to_string(),
            },
        };
        services.insert("document_repository".to_string(), repository);

        let vector_store = match self.store.list_collections().await {
            Ok(collections) => ComponentHealth {
                status: HealthStatus::Ok,
                message: format!("{} collection(s) available", collections.len()),
            },
            Err(error) => {
                tracing::warn!(error = %error, "Vector store health check failed");
                ComponentHealth {
                    status: HealthStatus::Error,
                    message: error.to_string(),
                }
            }
        };
        services.insert("vector_store".to_string(), vector_store);
        HealthReport::from_components(services)
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        self.store.list_collections().await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Route images and web pages into their collections when configured, else into the default.
fn routing_for(config: &Config) -> CollectionRouting {
    let documents = config.default_collection().to_string();
    let pick = |name: &str| {
        if config.collections.iter().any(|collection| collection == name) {
            name.to_string()
        } else {
            documents.clone()
        }
    };
    CollectionRouting {
        images: pick("images"),
        web_pages: pick("web_pages"),
        documents: documents.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{ChunkingStrategy, whitespace_token_counter};
    use crate::embedding::HashEmbeddingClient;
    use crate::store::InMemoryVectorStore;
    use serde_json::json;

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmClientError> {
            Ok("answer".to_string())
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmClientError> {
            Err(LlmClientError::GenerationFailed("model crashed".into()))
        }
    }

    fn service(llm: Arc<dyn LlmClient>) -> RagService {
        let embedder = Arc::new(HashEmbeddingClient::new(32));
        RagService::new(
            embedder.clone(),
            Arc::new(InMemoryVectorStore::new()),
            llm,
            Arc::new(InMemoryDocumentRepository::new()),
            Chunker::new(embedder).with_token_counter(whitespace_token_counter()),
            RagSettings {
                retriever: RetrieverSettings {
                    collections: vec!["documents".to_string()],
                    ..RetrieverSettings::default()
                },
                llm_timeout: Duration::from_secs(1),
                embedding_dimension: 32,
                chunking: ChunkingConfig::new(ChunkingStrategy::Recursive, 60, 10, 5)
                    .expect("config"),
                routing: CollectionRouting::default(),
            },
        )
    }

    fn ingest_request(id: &str, text: &str) -> IngestRequest {
        serde_json::from_value(json!({
            "id": id,
            "title": id,
            "filename": format!("{id}.txt"),
            "text": text,
        }))
        .expect("ingest request")
    }

    #[tokio::test]
    async fn ingest_then_generate_updates_metrics() {
        let service = service(Arc::new(EchoLlm));
        let response = service
            .ingest(ingest_request("notes", "Meeting notes about the launch plan."))
            .await
            .expect("ingest");
        assert_eq!(response.outcome.chunk_count, 1);
        assert_eq!(response.document.state, crate::ingest::DocumentState::Indexed);

        let result = service
            .generate(QueryRequest::new("launch plan"))
            .await
            .expect("answer");
        assert_eq!(result.answer, "answer");
        assert_eq!(result.documents[0].source, "notes.txt");

        let snapshot = service.metrics_snapshot();
        assert_eq!(snapshot.documents_indexed, 1);
        assert_eq!(snapshot.retrievals, 1);
        assert_eq!(snapshot.generations, 1);
    }

    #[tokio::test]
    async fn generation_failure_is_counted_separately() {
        let service = service(Arc::new(FailingLlm));
        service
            .ingest(ingest_request("notes", "Some indexed text."))
            .await
            .expect("ingest");

        let error = service
            .generate(QueryRequest::new("anything"))
            .await
            .expect_err("llm failure");
        assert!(matches!(error, QueryError::Generation(_)));

        let snapshot = service.metrics_snapshot();
        assert_eq!(snapshot.retrievals, 1);
        assert_eq!(snapshot.generation_failures, 1);
        assert_eq!(snapshot.retrieval_failures, 0);
    }

    #[tokio::test]
    async fn documents_and_chunks_are_readable_after_ingest() {
        let service = service(Arc::new(EchoLlm));
        for id in ["beta", "alpha", "gamma"] {
            service
                .ingest(ingest_request(id, "Short text about one topic."))
                .await
                .expect("ingest");
        }
        let long = "The first sentence is here. The second sentence follows it. \
                    A third sentence closes the note.";
        service
            .ingest(ingest_request("long", long))
            .await
            .expect("ingest");

        let page = PageRequest { skip: 1, limit: 2 };
        let ids: Vec<String> = service
            .list_documents(page)
            .await
            .expect("list")
            .into_iter()
            .map(|document| document.id)
            .collect();
        assert_eq!(ids, vec!["beta", "gamma"]);

        let document = service.get_document("long").await.expect("document");
        assert_eq!(document.filename.as_deref(), Some("long.txt"));

        let chunks = service
            .document_chunks("long", PageRequest::default())
            .await
            .expect("chunks");
        assert!(chunks.len() > 1);
        assert!(
            chunks
                .iter()
                .enumerate()
                .all(|(position, chunk)| chunk.chunk_index == position)
        );
        let tail = service
            .document_chunks("long", PageRequest { skip: 1, limit: 100 })
            .await
            .expect("chunks");
        assert_eq!(tail.len(), chunks.len() - 1);

        let missing = service.get_document("nope").await.expect_err("missing");
        assert!(matches!(missing, IngestError::UnknownDocument(_)));
    }

    #[tokio::test]
    async fn health_reports_every_component() {
        let service = service(Arc::new(EchoLlm));
        let report = service.health().await;
        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(
            report.services.keys().collect::<Vec<_>>(),
            vec!["document_repository", "vector_store"]
        );
    }

    #[test]
    fn one_failing_component_fails_the_report() {
        let mut services = BTreeMap::new();
        services.insert(
            "vector_store".to_string(),
            ComponentHealth {
                status: HealthStatus::Error,
                message: "connection refused".to_string(),
            },
        );
        services.insert(
            "document_repository".to_string(),
            ComponentHealth {
                status: HealthStatus::Ok,
                message: "0 document(s) registered".to_string(),
            },
        );
        assert_eq!(
            HealthReport::from_components(services).status,
            HealthStatus::Error
        );
    }

    #[tokio::test]
    async fn invalid_chunking_override_registers_nothing() {
        let service = service(Arc::new(EchoLlm));
        let mut request = ingest_request("bad", "text");
        request.chunking = Some(
            serde_json::from_value(json!({"chunk_size": 10, "chunk_overlap": 10}))
                .expect("settings"),
        );

        let error = service.ingest(request).await.expect_err("invalid config");
        assert!(matches!(error, IngestError::Configuration(_)));
        assert!(
            service
                .ingestion()
                .repository()
                .list()
                .await
                .expect("list")
                .is_empty()
        );
    }
}
