//! Document registration and the chunk, embed and index write path.

mod document;
mod repository;
mod service;

pub use document::{ChunkRecord, Document, DocumentState, NewDocument, SourceType};
pub use repository::{DocumentRepository, InMemoryDocumentRepository, RepositoryError};
pub use service::{CollectionRouting, IngestError, IngestOutcome, IngestionService, point_id};
