//! Document and chunk records kept by the metadata repository.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Processing state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    /// Registered, not yet chunked.
    Pending,
    /// Chunked; embedding and indexing not finished.
    Processed,
    /// All chunks are in the vector store.
    Indexed,
    /// Ingestion failed; see `error_message`.
    Error,
}

impl DocumentState {
    /// Whether `self -> next` is a legal transition.
    ///
    /// Re-indexing an indexed or failed document restarts at `Pending`.
    pub fn can_transition_to(self, next: DocumentState) -> bool {
        use DocumentState::*;
        matches!(
            (self, next),
            (Pending, Processed)
                | (Processed, Indexed)
                | (Pending | Processed, Error)
                | (Indexed | Error, Pending)
        )
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Indexed => "indexed",
            Self::Error => "error",
        })
    }
}

/// Where a document came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Uploaded file.
    #[default]
    Upload,
    /// Scraped web page.
    Web,
    /// Result of a database query.
    Database,
}

impl SourceType {
    /// Lowercase label stored in chunk metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Web => "web",
            Self::Database => "database",
        }
    }
}

/// Registration request for a new document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    /// Caller-chosen id; a UUID v4 is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Human-readable title.
    pub title: String,
    /// Original file name, when the document was a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// MIME type reported by the parser.
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// Origin of the document.
    #[serde(default)]
    pub source_type: SourceType,
    /// Source URL for web documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Opaque pointer into the blob store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    /// Size of the original file in bytes.
    #[serde(default)]
    pub size_bytes: u64,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
}

fn default_mime_type() -> String {
    "text/plain".to_string()
}

/// A registered document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Original file name.
    pub filename: Option<String>,
    /// MIME type.
    pub mime_type: String,
    /// Origin.
    pub source_type: SourceType,
    /// Source URL for web documents.
    pub url: Option<String>,
    /// Opaque blob store pointer.
    pub storage_path: Option<String>,
    /// Size of the original in bytes.
    pub size_bytes: u64,
    /// Free-text description.
    pub description: String,
    /// Collection the chunks are indexed into.
    pub collection: String,
    /// Processing state.
    pub state: DocumentState,
    /// Failure message when `state` is `Error`.
    pub error_message: Option<String>,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 time of the last change.
    pub updated_at: String,
}

/// Stored chunk row, pointing at its vector store entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Owning document.
    pub document_id: String,
    /// Position within the document, 0-based and contiguous.
    pub chunk_index: usize,
    /// Chunk text.
    pub content: String,
    /// Id of the vector store point holding this chunk.
    pub vector_id: String,
    /// Chunk metadata as indexed.
    pub metadata: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_allows_only_pipeline_steps() {
        use DocumentState::*;
        assert!(Pending.can_transition_to(Processed));
        assert!(Processed.can_transition_to(Indexed));
        assert!(Processed.can_transition_to(Error));
        assert!(Pending.can_transition_to(Error));
        assert!(Indexed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Indexed));
        assert!(!Indexed.can_transition_to(Error));
        assert!(!Error.can_transition_to(Indexed));
    }

    #[test]
    fn new_document_defaults_to_plain_text_upload() {
        let request: NewDocument =
            serde_json::from_str(r#"{"title": "Notes"}"#).expect("new document");
        assert_eq!(request.mime_type, "text/plain");
        assert_eq!(request.source_type, SourceType::Upload);
        assert!(request.id.is_none());
    }
}
