//! HTTP surface for docrag.
//!
//! A compact Axum router over [`RagApi`]:
//!
//! - `POST /retrieve` – Ranked, attributed context for a query (no LLM call).
//! - `POST /generate` – Retrieve context and answer the query from it.
//! - `POST /documents/:id/query` – Same as `/generate`, scoped to one document.
//! - `POST /documents` – Register a document and index its extracted text.
//! - `GET /documents` – Registered documents (`?skip=&limit=`).
//! - `GET /documents/:id` – One document record.
//! - `GET /documents/:id/chunks` – Stored chunk rows of a document (`?skip=&limit=`).
//! - `DELETE /documents/:id` – Delete a document, its chunks and its vector points.
//! - `GET /collections` – List vector store collections.
//! - `GET /metrics` – Pipeline counters.
//! - `GET /commands` – Machine-readable command catalog for discovery by tools.
//! - `GET /health` – Repository and vector store reachability; 503 when any check fails.
//!
//! Errors are JSON bodies `{ "error": <kind>, "message": ... }`. Invalid input maps to 400,
//! retrieval failures to 502 `retrieval_failed`, and generation failures to 503
//! `generation_failed` with the successful retrieval attached under `retrieval`.

use crate::ingest::{ChunkRecord, Document, IngestError};
use crate::metrics::MetricsSnapshot;
use crate::retrieval::{
    GenerationResult, QueryError, QueryRequest, RetrievalError, RetrievalResult,
};
use crate::service::{
    HealthReport, HealthStatus, IngestRequest, IngestResponse, PageRequest, RagApi,
};
use crate::store::VectorStoreError;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// Build the HTTP router exposing the query and ingestion API.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: RagApi + 'static,
{
    Router::new()
        .route("/retrieve", post(retrieve::<S>))
        .route("/generate", post(generate::<S>))
        .route(
            "/documents",
            post(ingest_document::<S>).get(list_documents::<S>),
        )
        .route(
            "/documents/:id",
            get(get_document::<S>).delete(delete_document::<S>),
        )
        .route("/documents/:id/chunks", get(document_chunks::<S>))
        .route("/documents/:id/query", post(query_document::<S>))
        .route("/collections", get(list_collections::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .route("/health", get(health::<S>))
        .with_state(service)
}

/// Retrieve context without generating an answer.
async fn retrieve<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<RetrievalResult>, AppError>
where
    S: RagApi,
{
    let result = service.retrieve(request).await?;
    Ok(Json(result))
}

/// Retrieve context and answer the query.
async fn generate<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<GenerationResult>, AppError>
where
    S: RagApi,
{
    let result = service.generate(request).await?;
    tracing::info!(
        documents = result.metrics.total_documents,
        total_ms = result.metrics.total_time_ms,
        "Generate request completed"
    );
    Ok(Json(result))
}

/// Body for `POST /documents/:id/query`.
#[derive(Deserialize)]
struct DocumentQueryRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

/// Answer a query using only the chunks of one document.
async fn query_document<S>(
    State(service): State<Arc<S>>,
    Path(document_id): Path<String>,
    Json(request): Json<DocumentQueryRequest>,
) -> Result<Json<GenerationResult>, AppError>
where
    S: RagApi,
{
    let mut query = QueryRequest::new(request.query).with_document_ids([document_id]);
    query.top_k = request.top_k;
    let result = service.generate(query).await?;
    Ok(Json(result))
}

/// Register a document and index its text.
async fn ingest_document<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError>
where
    S: RagApi,
{
    let response = service.ingest(request).await?;
    tracing::info!(
        document_id = %response.document.id,
        chunks = response.outcome.chunk_count,
        collection = %response.outcome.collection,
        "Ingest request completed"
    );
    Ok((StatusCode::CREATED, Json(response)))
}

/// Delete a document and everything indexed for it.
async fn delete_document<S>(
    State(service): State<Arc<S>>,
    Path(document_id): Path<String>,
) -> Result<Json<Document>, AppError>
where
    S: RagApi,
{
    let removed = service.delete_document(&document_id).await?;
    Ok(Json(removed))
}

async fn list_documents<S>(
    State(service): State<Arc<S>>,
    Query(page): Query<PageRequest>,
) -> Result<Json<Vec<Document>>, AppError>
where
    S: RagApi,
{
    Ok(Json(service.list_documents(page).await?))
}

async fn get_document<S>(
    State(service): State<Arc<S>>,
    Path(document_id): Path<String>,
) -> Result<Json<Document>, AppError>
where
    S: RagApi,
{
    Ok(Json(service.get_document(&document_id).await?))
}

async fn document_chunks<S>(
    State(service): State<Arc<S>>,
    Path(document_id): Path<String>,
    Query(page): Query<PageRequest>,
) -> Result<Json<Vec<ChunkRecord>>, AppError>
where
    S: RagApi,
{
    Ok(Json(service.document_chunks(&document_id, page).await?))
}

async fn health<S>(State(service): State<Arc<S>>) -> (StatusCode, Json<HealthReport>)
where
    S: RagApi,
{
    let report = service.health().await;
    let status = match report.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Error => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

/// Response body for `GET /collections`.
#[derive(Serialize)]
struct CollectionsResponse {
    collections: Vec<String>,
}

async fn list_collections<S>(
    State(service): State<Arc<S>>,
) -> Result<Json<CollectionsResponse>, AppError>
where
    S: RagApi,
{
    let collections = service.list_collections().await?;
    Ok(Json(CollectionsResponse { collections }))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: RagApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "retrieve",
                method: "POST",
                path: "/retrieve",
                description: "Return ranked chunks and the attributed context for a query.",
                request_example: Some(json!({
                    "query": "What was Q3 revenue?",
                    "document_ids": ["doc-1"],
                    "collection_names": ["documents"],
                    "filter_criteria": {"source_type": "upload"},
                    "top_k": 5
                })),
            },
            CommandDescriptor {
                name: "generate",
                method: "POST",
                path: "/generate",
                description: "Retrieve context and answer the query with the language model.",
                request_example: Some(json!({
                    "query": "Summarize the launch plan",
                    "document_ids": ["doc-1", "doc-2"]
                })),
            },
            CommandDescriptor {
                name: "query_document",
                method: "POST",
                path: "/documents/:id/query",
                description: "Answer a query from a single document.",
                request_example: Some(json!({"query": "Who signed the contract?"})),
            },
            CommandDescriptor {
                name: "ingest",
                method: "POST",
                path: "/documents",
                description: "Register a document and chunk, embed and index its text.",
                request_example: Some(json!({
                    "title": "Q3 report",
                    "filename": "q3.txt",
                    "mime_type": "text/plain",
                    "text": "Extracted document text",
                    "chunking": {"strategy": "sentence", "chunk_size": 800, "chunk_overlap": 100}
                })),
            },
            CommandDescriptor {
                name: "list_documents",
                method: "GET",
                path: "/documents",
                description: "List registered documents; accepts skip and limit query parameters.",
                request_example: None,
            },
            CommandDescriptor {
                name: "get_document",
                method: "GET",
                path: "/documents/:id",
                description: "Return one document record with its processing state.",
                request_example: None,
            },
            CommandDescriptor {
                name: "document_chunks",
                method: "GET",
                path: "/documents/:id/chunks",
                description: "Return the stored chunks of a document in index order.",
                request_example: None,
            },
            CommandDescriptor {
                name: "delete_document",
                method: "DELETE",
                path: "/documents/:id",
                description: "Delete a document with its chunks and vector points.",
                request_example: None,
            },
            CommandDescriptor {
                name: "list_collections",
                method: "GET",
                path: "/collections",
                description: "Return the names of the vector store collections.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion and query counters.",
                request_example: None,
            },
            CommandDescriptor {
                name: "health",
                method: "GET",
                path: "/health",
                description: "Check the document repository and the vector store.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    Retrieval(RetrievalError),
    Query(QueryError),
    Ingest(IngestError),
    Store(VectorStoreError),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, Value) {
        match self {
            Self::Retrieval(error) | Self::Query(QueryError::Retrieval(error)) => {
                retrieval_response(&error)
            }
            Self::Query(QueryError::Generation(error)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "error": "generation_failed",
                    "message": error.to_string(),
                    "retrieval": error.retrieval,
                }),
            ),
            Self::Ingest(error) => {
                let status = match &error {
                    IngestError::Configuration(_) | IngestError::EmptyDocument(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    IngestError::UnknownDocument(_) => StatusCode::NOT_FOUND,
                    IngestError::InvalidTransition { .. } | IngestError::Repository(_) => {
                        StatusCode::CONFLICT
                    }
                    IngestError::Embedding { .. } | IngestError::Store { .. } => {
                        StatusCode::BAD_GATEWAY
                    }
                };
                (
                    status,
                    json!({"error": "ingest_failed", "message": error.to_string()}),
                )
            }
            Self::Store(error) => (
                StatusCode::BAD_GATEWAY,
                json!({"error": "store_failed", "message": error.to_string()}),
            ),
        }
    }
}

fn retrieval_response(error: &RetrievalError) -> (StatusCode, Value) {
    match error {
        RetrievalError::InvalidRequest(_) => (
            StatusCode::BAD_REQUEST,
            json!({"error": "invalid_request", "message": error.to_string()}),
        ),
        RetrievalError::AllCollectionsFailed { failures } => (
            StatusCode::BAD_GATEWAY,
            json!({
                "error": "retrieval_failed",
                "message": error.to_string(),
                "failed_collections": failures,
            }),
        ),
        RetrievalError::QueryEmbedding(_) => (
            StatusCode::BAD_GATEWAY,
            json!({"error": "retrieval_failed", "message": error.to_string()}),
        ),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        if status.is_server_error() {
            tracing::warn!(status = %status, error = %body["message"], "Request failed");
        }
        (status, Json(body)).into_response()
    }
}

impl From<RetrievalError> for AppError {
    fn from(inner: RetrievalError) -> Self {
        Self::Retrieval(inner)
    }
}

impl From<QueryError> for AppError {
    fn from(inner: QueryError) -> Self {
        Self::Query(inner)
    }
}

impl From<IngestError> for AppError {
    fn from(inner: IngestError) -> Self {
        Self::Ingest(inner)
    }
}

impl From<VectorStoreError> for AppError {
    fn from(inner: VectorStoreError) -> Self {
        Self::Store(inner)
    }
}
