//! Ingestion orchestrator: chunk, embed, index, and keep the document record in step.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::document::{ChunkRecord, Document, DocumentState, NewDocument, SourceType};
use super::repository::{DocumentRepository, RepositoryError};
use crate::chunking::{
    Chunker, ChunkingConfig, ChunkingFallback, ChunkingStrategy, ConfigurationError, TextChunk,
};
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::metrics::PipelineMetrics;
use crate::qdrant::payload::current_timestamp_rfc3339;
use crate::store::{
    CHUNK_INDEX_FIELD, DOCUMENT_ID_FIELD, MetadataFilter, VectorPoint, VectorStore,
    VectorStoreError,
};

/// Errors emitted by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Requested chunking settings are invalid.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// No document with this id is registered.
    #[error("Document '{0}' not found")]
    UnknownDocument(String),
    /// The document is not in a state that allows the requested step.
    #[error("Document '{document_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        /// Document id.
        document_id: String,
        /// Current state.
        from: DocumentState,
        /// Requested state.
        to: DocumentState,
    },
    /// Chunking produced nothing to index.
    #[error("Document '{0}' has no indexable text")]
    EmptyDocument(String),
    /// Embedding the chunks failed.
    #[error("Failed to embed chunks of '{document_id}': {source}")]
    Embedding {
        /// Document id.
        document_id: String,
        /// Provider failure.
        #[source]
        source: EmbeddingClientError,
    },
    /// Writing to or deleting from the vector store failed.
    #[error("Vector store failed for '{document_id}' in '{collection}': {source}")]
    Store {
        /// Document id.
        document_id: String,
        /// Target collection.
        collection: String,
        /// Store failure.
        #[source]
        source: VectorStoreError,
    },
    /// Repository failure.
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for IngestError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(id) => Self::UnknownDocument(id),
            other => Self::Repository(other),
        }
    }
}

/// Collection names documents are routed into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRouting {
    /// Everything that is neither an image nor a web page.
    pub documents: String,
    /// `image/*` documents.
    pub images: String,
    /// Web sources.
    pub web_pages: String,
}

impl Default for CollectionRouting {
    fn default() -> Self {
        Self {
            documents: "documents".to_string(),
            images: "images".to_string(),
            web_pages: "web_pages".to_string(),
        }
    }
}

impl CollectionRouting {
    /// Collection a document with this MIME type and source belongs in.
    pub fn route(&self, mime_type: &str, source_type: SourceType) -> &str {
        if mime_type.trim().to_ascii_lowercase().starts_with("image/") {
            &self.images
        } else if source_type == SourceType::Web {
            &self.web_pages
        } else {
            &self.documents
        }
    }

    /// Every routed collection, without duplicates.
    pub fn all(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(3);
        for name in [&self.documents, &self.images, &self.web_pages] {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }
}

/// Summary of a completed [`IngestionService::chunk_and_index`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    /// Indexed document.
    pub document_id: String,
    /// Collection the chunks were written to.
    pub collection: String,
    /// Number of chunks written.
    pub chunk_count: usize,
    /// Strategy that produced the chunks.
    pub strategy: ChunkingStrategy,
    /// Present when the requested strategy could not be applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<ChunkingFallback>,
}

/// Drives documents from registration to indexed chunks.
pub struct IngestionService {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingClient + Send + Sync>,
    store: Arc<dyn VectorStore>,
    repository: Arc<dyn DocumentRepository>,
    metrics: Arc<PipelineMetrics>,
    routing: CollectionRouting,
    dimension: usize,
}

impl IngestionService {
    /// Assemble the service. `dimension` is the vector size collections are created with.
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingClient + Send + Sync>,
        store: Arc<dyn VectorStore>,
        repository: Arc<dyn DocumentRepository>,
        metrics: Arc<PipelineMetrics>,
        dimension: usize,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            repository,
            metrics,
            routing: CollectionRouting::default(),
            dimension,
        }
    }

    /// Replace the collection routing.
    pub fn with_routing(mut self, routing: CollectionRouting) -> Self {
        self.routing = routing;
        self
    }

    /// Collection routing in use.
    pub fn routing(&self) -> &CollectionRouting {
        &self.routing
    }

    /// Repository backing this service.
    pub fn repository(&self) -> &Arc<dyn DocumentRepository> {
        &self.repository
    }

    /// Register a document in the `pending` state.
    pub async fn register_document(&self, request: NewDocument) -> Result<Document, IngestError> {
        let id = request
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let title = if request.title.trim().is_empty() {
            request.filename.clone().unwrap_or_else(|| id.clone())
        } else {
            request.title
        };
        let collection = self
            .routing
            .route(&request.mime_type, request.source_type)
            .to_string();
        let now = current_timestamp_rfc3339();
        let document = Document {
            id,
            title,
            filename: request.filename,
            mime_type: request.mime_type,
            source_type: request.source_type,
            url: request.url,
            storage_path: request.storage_path,
            size_bytes: request.size_bytes,
            description: request.description,
            collection,
            state: DocumentState::Pending,
            error_message: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.repository.insert(document.clone()).await?;
        tracing::info!(
            document_id = %document.id,
            collection = %document.collection,
            "Document registered"
        );
        Ok(document)
    }

    /// Chunk `raw_text`, embed the chunks and write them to the document's collection.
    ///
    /// Re-indexing replaces the previous points of the document. On failure the document moves
    /// to `error` with the message recorded and the error is returned.
    pub async fn chunk_and_index(
        &self,
        document_id: &str,
        raw_text: &str,
        config: &ChunkingConfig,
    ) -> Result<IngestOutcome, IngestError> {
        let mut document = self.repository.get(document_id).await?;
        if matches!(document.state, DocumentState::Indexed | DocumentState::Error) {
            transition(&mut document, DocumentState::Pending)?;
            document.error_message = None;
        }

        let chunked = self.chunker.split(raw_text, config).await;
        if chunked.is_empty() {
            let error = IngestError::EmptyDocument(document.id.clone());
            return Err(self.fail(document, error).await);
        }
        transition(&mut document, DocumentState::Processed)?;
        self.repository.update(document.clone()).await?;
        tracing::debug!(
            document_id = %document.id,
            chunks = chunked.len(),
            strategy = %chunked.strategy,
            "Document chunked"
        );

        let texts: Vec<String> = chunked
            .chunks
            .iter()
            .map(|chunk| chunk.content.clone())
            .collect();
        let embeddings = match self.embed(&document.id, texts).await {
            Ok(embeddings) => embeddings,
            Err(error) => return Err(self.fail(document, error).await),
        };

        let points: Vec<VectorPoint> = chunked
            .chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, vector)| VectorPoint {
                id: point_id(&document.id, chunk.index),
                vector,
                content: chunk.content.clone(),
                metadata: chunk_metadata(&document, chunk),
            })
            .collect();
        let records: Vec<ChunkRecord> = points
            .iter()
            .zip(&chunked.chunks)
            .map(|(point, chunk)| ChunkRecord {
                document_id: document.id.clone(),
                chunk_index: chunk.index,
                content: chunk.content.clone(),
                vector_id: point.id.clone(),
                metadata: point.metadata.clone(),
            })
            .collect();

        let collection = document.collection.clone();
        if let Err(source) = self.write_points(&document.id, &collection, points).await {
            let error = IngestError::Store {
                document_id: document.id.clone(),
                collection,
                source,
            };
            return Err(self.fail(document, error).await);
        }

        let chunk_count = records.len();
        self.repository.replace_chunks(&document.id, records).await?;
        transition(&mut document, DocumentState::Indexed)?;
        document.updated_at = current_timestamp_rfc3339();
        self.repository.update(document.clone()).await?;
        self.metrics.record_document(chunk_count as u64);
        tracing::info!(
            document_id = %document.id,
            collection = %collection,
            chunks = chunk_count,
            strategy = %chunked.strategy,
            fallback = chunked.fallback.is_some(),
            "Document indexed"
        );

        Ok(IngestOutcome {
            document_id: document.id,
            collection,
            chunk_count,
            strategy: chunked.strategy,
            fallback: chunked.fallback,
        })
    }

    /// Remove a document's points from every routed collection, then its record and chunks.
    pub async fn delete_document(&self, document_id: &str) -> Result<Document, IngestError> {
        self.repository.get(document_id).await?;
        let filter = MetadataFilter::equals(DOCUMENT_ID_FIELD, document_id);
        for collection in self.routing.all() {
            match self.store.delete_matching(collection, &filter).await {
                Ok(()) | Err(VectorStoreError::UnknownCollection(_)) => {}
                Err(source) => {
                    return Err(IngestError::Store {
                        document_id: document_id.to_string(),
                        collection: collection.to_string(),
                        source,
                    });
                }
            }
        }
        let removed = self.repository.delete(document_id).await?;
        self.metrics.record_deletion();
        tracing::info!(document_id, "Document deleted");
        Ok(removed)
    }

    async fn embed(
        &self,
        document_id: &str,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, IngestError> {
        let expected = texts.len();
        let embeddings = self
            .embedder
            .generate_embeddings(texts)
            .await
            .map_err(|source| IngestError::Embedding {
                document_id: document_id.to_string(),
                source,
            })?;
        if embeddings.len() != expected {
            return Err(IngestError::Embedding {
                document_id: document_id.to_string(),
                source: EmbeddingClientError::InvalidResponse(format!(
                    "expected {expected} embeddings, got {}",
                    embeddings.len()
                )),
            });
        }
        Ok(embeddings)
    }

    async fn write_points(
        &self,
        document_id: &str,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<usize, VectorStoreError> {
        self.store
            .ensure_collection(collection, self.dimension)
            .await?;
        let stale = MetadataFilter::equals(DOCUMENT_ID_FIELD, document_id);
        self.store.delete_matching(collection, &stale).await?;
        self.store.upsert(collection, points).await
    }

    /// Record `error` on the document and hand it back for returning.
    async fn fail(&self, mut document: Document, error: IngestError) -> IngestError {
        tracing::error!(document_id = %document.id, error = %error, "Ingestion failed");
        self.metrics.record_document_failure();
        if document.state.can_transition_to(DocumentState::Error) {
            document.state = DocumentState::Error;
            document.error_message = Some(error.to_string());
            document.updated_at = current_timestamp_rfc3339();
            if let Err(update_error) = self.repository.update(document).await {
                tracing::warn!(error = %update_error, "Failed to record ingestion error");
            }
        }
        error
    }
}

impl std::fmt::Debug for IngestionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionService")
            .field("chunker", &self.chunker)
            .field("routing", &self.routing)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

fn transition(document: &mut Document, next: DocumentState) -> Result<(), IngestError> {
    if !document.state.can_transition_to(next) {
        return Err(IngestError::InvalidTransition {
            document_id: document.id.clone(),
            from: document.state,
            to: next,
        });
    }
    document.state = next;
    Ok(())
}

/// Deterministic point id so re-indexing a document overwrites its points.
pub fn point_id(document_id: &str, chunk_index: usize) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{document_id}:{chunk_index}").as_bytes(),
    )
    .to_string()
}

fn chunk_metadata(document: &Document, chunk: &TextChunk) -> Map<String, Value> {
    let mut metadata = chunk.metadata.clone();
    metadata.insert(
        DOCUMENT_ID_FIELD.into(),
        Value::String(document.id.clone()),
    );
    metadata.insert(CHUNK_INDEX_FIELD.into(), Value::from(chunk.index));
    metadata.insert("title".into(), Value::String(document.title.clone()));
    metadata.insert(
        "source_type".into(),
        Value::String(document.source_type.as_str().to_string()),
    );
    metadata.insert(
        "mime_type".into(),
        Value::String(document.mime_type.clone()),
    );
    if let Some(filename) = &document.filename {
        metadata.insert("filename".into(), Value::String(filename.clone()));
    }
    if let Some(url) = &document.url {
        metadata.insert("url".into(), Value::String(url.clone()));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingClient;
    use crate::ingest::InMemoryDocumentRepository;
    use crate::store::InMemoryVectorStore;
    use async_trait::async_trait;

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingClient for DownEmbedder {
        async fn generate_embeddings(
            &self,
            _texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Err(EmbeddingClientError::ProviderUnavailable("offline".into()))
        }
    }

    fn service_with(
        embedder: Arc<dyn EmbeddingClient + Send + Sync>,
    ) -> (IngestionService, Arc<InMemoryVectorStore>) {
        let store = Arc::new(InMemoryVectorStore::new());
        let service = IngestionService::new(
            Chunker::new(embedder.clone()),
            embedder,
            store.clone(),
            Arc::new(InMemoryDocumentRepository::new()),
            Arc::new(PipelineMetrics::new()),
            16,
        );
        (service, store)
    }

    fn small_config() -> ChunkingConfig {
        ChunkingConfig::new(ChunkingStrategy::Recursive, 40, 10, 5).expect("config")
    }

    const TEXT: &str = "The quarterly report shows revenue growth.\n\n\
        Costs were flat across regions.\n\nHeadcount grew by four people.";

    #[test]
    fn routes_images_and_web_pages() {
        let routing = CollectionRouting::default();
        assert_eq!(routing.route("image/png", SourceType::Upload), "images");
        assert_eq!(routing.route("text/html", SourceType::Web), "web_pages");
        assert_eq!(routing.route("application/pdf", SourceType::Upload), "documents");
        assert_eq!(routing.all(), vec!["documents", "images", "web_pages"]);
    }

    #[test]
    fn point_ids_are_stable_per_chunk() {
        assert_eq!(point_id("doc", 0), point_id("doc", 0));
        assert_ne!(point_id("doc", 0), point_id("doc", 1));
        assert!(Uuid::parse_str(&point_id("doc", 3)).is_ok());
    }

    #[tokio::test]
    async fn indexes_chunks_with_document_metadata() {
        let (service, store) = service_with(Arc::new(HashEmbeddingClient::new(16)));
        let document = service
            .register_document(NewDocument {
                id: Some("report".into()),
                title: "Q3".into(),
                filename: Some("q3.txt".into()),
                ..NewDocument::default()
            })
            .await
            .expect("register");
        assert_eq!(document.state, DocumentState::Pending);

        let outcome = service
            .chunk_and_index("report", TEXT, &small_config())
            .await
            .expect("index");

        assert_eq!(outcome.collection, "documents");
        assert!(outcome.chunk_count > 1);
        assert_eq!(store.point_count("documents").await, outcome.chunk_count);

        let stored = service.repository().get("report").await.expect("document");
        assert_eq!(stored.state, DocumentState::Indexed);
        let chunks = service.repository().chunks("report").await.expect("chunks");
        assert_eq!(chunks.len(), outcome.chunk_count);
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, position);
            assert_eq!(chunk.vector_id, point_id("report", position));
            assert_eq!(chunk.metadata["document_id"], "report");
            assert_eq!(chunk.metadata["filename"], "q3.txt");
        }
    }

    #[tokio::test]
    async fn reindexing_replaces_previous_points() {
        let (service, store) = service_with(Arc::new(HashEmbeddingClient::new(16)));
        service
            .register_document(NewDocument {
                id: Some("doc".into()),
                title: "Doc".into(),
                ..NewDocument::default()
            })
            .await
            .expect("register");

        service
            .chunk_and_index("doc", TEXT, &small_config())
            .await
            .expect("first index");
        let outcome = service
            .chunk_and_index("doc", "A much shorter replacement text.", &small_config())
            .await
            .expect("second index");

        assert_eq!(outcome.chunk_count, 1);
        assert_eq!(store.point_count("documents").await, 1);
    }

    #[tokio::test]
    async fn embedding_failure_moves_document_to_error() {
        let (service, _store) = service_with(Arc::new(DownEmbedder));
        service
            .register_document(NewDocument {
                id: Some("doc".into()),
                title: "Doc".into(),
                ..NewDocument::default()
            })
            .await
            .expect("register");

        let error = service
            .chunk_and_index("doc", TEXT, &small_config())
            .await
            .expect_err("embedding failure");
        assert!(matches!(error, IngestError::Embedding { .. }));

        let stored = service.repository().get("doc").await.expect("document");
        assert_eq!(stored.state, DocumentState::Error);
        assert!(stored.error_message.is_some_and(|message| message.contains("offline")));
    }

    #[tokio::test]
    async fn blank_text_is_rejected_and_recorded() {
        let (service, _store) = service_with(Arc::new(HashEmbeddingClient::new(16)));
        service
            .register_document(NewDocument {
                id: Some("blank".into()),
                title: "Blank".into(),
                ..NewDocument::default()
            })
            .await
            .expect("register");

        let error = service
            .chunk_and_index("blank", "  \n ", &small_config())
            .await
            .expect_err("empty");
        assert!(matches!(error, IngestError::EmptyDocument(_)));
        let stored = service.repository().get("blank").await.expect("document");
        assert_eq!(stored.state, DocumentState::Error);
    }

    #[tokio::test]
    async fn delete_removes_points_and_record() {
        let (service, store) = service_with(Arc::new(HashEmbeddingClient::new(16)));
        for id in ["keep", "drop"] {
            service
                .register_document(NewDocument {
                    id: Some(id.into()),
                    title: id.into(),
                    ..NewDocument::default()
                })
                .await
                .expect("register");
            service
                .chunk_and_index(id, TEXT, &small_config())
                .await
                .expect("index");
        }
        let before = store.point_count("documents").await;

        service.delete_document("drop").await.expect("delete");

        assert_eq!(store.point_count("documents").await, before / 2);
        assert!(matches!(
            service.repository().get("drop").await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            service.delete_document("drop").await,
            Err(IngestError::UnknownDocument(_))
        ));
    }
}
