//! Document metadata repository.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;

use super::document::{ChunkRecord, Document};

/// Errors raised by repository backends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    /// No document with this id.
    #[error("Document '{0}' not found")]
    NotFound(String),
    /// A document with this id already exists.
    #[error("Document '{0}' already exists")]
    AlreadyExists(String),
}

/// Storage for document records and their chunk rows.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Store a new document.
    async fn insert(&self, document: Document) -> Result<(), RepositoryError>;

    /// Fetch a document by id.
    async fn get(&self, id: &str) -> Result<Document, RepositoryError>;

    /// Overwrite an existing document.
    async fn update(&self, document: Document) -> Result<(), RepositoryError>;

    /// Replace every chunk row of `document_id`.
    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), RepositoryError>;

    /// Chunk rows of `document_id` ordered by index.
    async fn chunks(&self, document_id: &str) -> Result<Vec<ChunkRecord>, RepositoryError>;

    /// All documents ordered by id.
    async fn list(&self) -> Result<Vec<Document>, RepositoryError>;

    /// Remove a document and its chunk rows, returning the removed document.
    async fn delete(&self, id: &str) -> Result<Document, RepositoryError>;
}

/// Repository kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDocumentRepository {
    documents: RwLock<BTreeMap<String, Document>>,
    chunks: RwLock<HashMap<String, Vec<ChunkRecord>>>,
}

impl InMemoryDocumentRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn insert(&self, document: Document) -> Result<(), RepositoryError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&document.id) {
            return Err(RepositoryError::AlreadyExists(document.id));
        }
        documents.insert(document.id.clone(), document);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Document, RepositoryError> {
        self.documents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn update(&self, document: Document) -> Result<(), RepositoryError> {
        let mut documents = self.documents.write().await;
        match documents.get_mut(&document.id) {
            Some(stored) => {
                *stored = document;
                Ok(())
            }
            None => Err(RepositoryError::NotFound(document.id)),
        }
    }

    async fn replace_chunks(
        &self,
        document_id: &str,
        mut chunks: Vec<ChunkRecord>,
    ) -> Result<(), RepositoryError> {
        if !self.documents.read().await.contains_key(document_id) {
            return Err(RepositoryError::NotFound(document_id.to_string()));
        }
        chunks.sort_by_key(|chunk| chunk.chunk_index);
        self.chunks
            .write()
            .await
            .insert(document_id.to_string(), chunks);
        Ok(())
    }

    async fn chunks(&self, document_id: &str) -> Result<Vec<ChunkRecord>, RepositoryError> {
        if !self.documents.read().await.contains_key(document_id) {
            return Err(RepositoryError::NotFound(document_id.to_string()));
        }
        Ok(self
            .chunks
            .read()
            .await
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list(&self) -> Result<Vec<Document>, RepositoryError> {
        Ok(self.documents.read().await.values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<Document, RepositoryError> {
        let removed = self
            .documents
            .write()
            .await
            .remove(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        self.chunks.write().await.remove(id);
        Ok(removed)
    }
}
