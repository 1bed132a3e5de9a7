//! Vector store gateway: upsert and filtered similarity search over named collections.

mod filter;
mod memory;

pub use filter::{CHUNK_INDEX_FIELD, DOCUMENT_ID_FIELD, FilterError, MetadataFilter};
pub use memory::InMemoryVectorStore;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::qdrant::QdrantError;

/// Errors raised by vector store backends.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Collection has not been created.
    #[error("Collection '{0}' does not exist")]
    UnknownCollection(String),
    /// Vector size differs from the collection's configured dimension.
    #[error("Vector dimension mismatch in '{collection}': expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Target collection.
        collection: String,
        /// Dimension the collection was created with.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },
    /// Qdrant request failed.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
}

/// Full point written to a collection: identifier, vector, content and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    /// Stable point identifier.
    pub id: String,
    /// Embedding of `content`.
    pub vector: Vec<f32>,
    /// Chunk text.
    pub content: String,
    /// Filterable metadata, including `document_id` and `chunk_index`.
    pub metadata: Map<String, Value>,
}

/// Search hit. Higher `score` means more similar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorHit {
    /// Point identifier.
    pub id: String,
    /// Chunk text.
    pub content: String,
    /// Stored metadata.
    pub metadata: Map<String, Value>,
    /// Similarity score.
    pub score: f32,
}

/// Interface implemented by vector store backends.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create `collection` for vectors of `dimension` values unless it already exists.
    async fn ensure_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<(), VectorStoreError>;

    /// Insert or replace points by id. Returns the number of points written.
    async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<usize, VectorStoreError>;

    /// Return up to `limit` hits ordered by descending score.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>, VectorStoreError>;

    /// Remove every point whose metadata matches `filter`.
    async fn delete_matching(
        &self,
        collection: &str,
        filter: &MetadataFilter,
    ) -> Result<(), VectorStoreError>;

    /// Names of all existing collections.
    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError>;
}
