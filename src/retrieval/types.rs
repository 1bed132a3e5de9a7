//! Request, result and error types for the query pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::embedding::EmbeddingClientError;
use crate::store::{FilterError, MetadataFilter};

/// Default number of chunks retrieved per query.
pub const DEFAULT_TOP_K: usize = 5;

/// A retrieval or generation request as accepted by the HTTP surface and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Natural-language query.
    pub query: String,
    /// Restrict results to these documents. Empty means every document.
    #[serde(default)]
    pub document_ids: Vec<String>,
    /// Legacy single-document scope, merged into `document_ids`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Collections to search. Empty means the configured defaults.
    #[serde(default)]
    pub collection_names: Vec<String>,
    /// Additional metadata criteria (`{field: value}`, `{field: [values]}`, `$eq`, `$in`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_criteria: Option<Map<String, Value>>,
    /// Maximum number of chunks to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

impl QueryRequest {
    /// Unscoped request for `query`.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Scope the request to the given documents.
    pub fn with_document_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.document_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Search only the given collections.
    pub fn with_collections<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collection_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Override the number of chunks returned.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Document scope with the legacy `document_id` merged in, trimmed and de-duplicated.
    pub fn scoped_document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.document_ids.iter().chain(self.document_id.iter()) {
            let trimmed = id.trim();
            if !trimmed.is_empty() && !ids.iter().any(|existing| existing == trimmed) {
                ids.push(trimmed.to_string());
            }
        }
        ids
    }

    /// Typed form of `filter_criteria`.
    pub fn criteria_filter(&self) -> Result<Option<MetadataFilter>, RetrievalError> {
        match &self.filter_criteria {
            Some(criteria) => Ok(MetadataFilter::from_criteria(criteria)?),
            None => Ok(None),
        }
    }
}

/// How per-collection results are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Merge by score and keep the best `top_k` overall.
    #[default]
    Global,
    /// Keep up to `top_k` from every collection.
    PerCollection,
}

/// A chunk selected for the answer context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    /// Vector store point id.
    pub id: String,
    /// Collection the chunk was found in.
    pub collection: String,
    /// Chunk text.
    pub content: String,
    /// Stored chunk metadata.
    pub metadata: Map<String, Value>,
    /// Similarity score; higher is more relevant.
    pub score: f32,
    /// Attribution label rendered into the context.
    pub source: String,
}

/// A collection that contributed no results because its search failed or timed out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionFailure {
    /// Collection name.
    pub collection: String,
    /// Failure description.
    pub reason: String,
}

/// Timing and count metrics for one retrieval.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalMetrics {
    /// Wall time of the whole retrieval.
    pub retrieval_time_ms: u64,
    /// Time spent embedding the query.
    pub embedding_time_ms: u64,
    /// Time spent in the collection fan-out.
    pub search_time_ms: u64,
    /// Hits returned by all collections before de-duplication.
    pub total_candidates: usize,
    /// Hits left after de-duplication.
    pub deduplicated: usize,
    /// Hits left after `top_k` truncation.
    pub returned: usize,
    /// Chunks that fit into the context budget.
    pub in_context: usize,
    /// Tokens used by the assembled context.
    pub context_tokens: usize,
    /// Collections that were searched.
    pub collections_searched: Vec<String>,
    /// Collections whose search failed or timed out.
    pub failed_collections: Vec<CollectionFailure>,
}

/// Outcome of a retrieval: ranked chunks, the context built from them and metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// Query that was answered.
    pub query: String,
    /// Chunks included in `context`, most relevant first.
    pub documents: Vec<RetrievedChunk>,
    /// Attributed context text.
    pub context: String,
    /// Timings and counts.
    pub metrics: RetrievalMetrics,
}

/// Retrieval could not produce a result.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Request failed validation.
    #[error("Invalid query request: {0}")]
    InvalidRequest(String),
    /// Query embedding call failed or returned no vector.
    #[error("Failed to embed query: {0}")]
    QueryEmbedding(#[source] EmbeddingClientError),
    /// Every searched collection failed.
    #[error("All searched collections failed: {}", describe_failures(.failures))]
    AllCollectionsFailed {
        /// Per-collection failure details.
        failures: Vec<CollectionFailure>,
    },
}

impl From<FilterError> for RetrievalError {
    fn from(error: FilterError) -> Self {
        Self::InvalidRequest(error.to_string())
    }
}

fn describe_failures(failures: &[CollectionFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{} ({})", failure.collection, failure.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Lifecycle of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStage {
    /// Request accepted.
    Received,
    /// Embedding the query text.
    EmbeddingQuery,
    /// Fanning out to collections.
    Searching,
    /// Context built from the ranked chunks.
    ContextAssembled,
    /// Waiting for the language model.
    PromptingLlm,
    /// Answer produced.
    Answered,
    /// Request failed.
    Errored,
}

impl RequestStage {
    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_advance_to(self, next: RequestStage) -> bool {
        use RequestStage::*;
        matches!(
            (self, next),
            (Received, EmbeddingQuery)
                | (EmbeddingQuery, Searching)
                | (Searching, ContextAssembled)
                | (ContextAssembled, PromptingLlm)
                | (PromptingLlm, Answered)
                | (EmbeddingQuery | Searching | PromptingLlm, Errored)
        )
    }
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Received => "received",
            Self::EmbeddingQuery => "embedding_query",
            Self::Searching => "searching",
            Self::ContextAssembled => "context_assembled",
            Self::PromptingLlm => "prompting_llm",
            Self::Answered => "answered",
            Self::Errored => "errored",
        };
        f.write_str(label)
    }
}

/// Tracks the stage of one request and logs each transition.
#[derive(Debug)]
pub(crate) struct StageTracker {
    stage: RequestStage,
}

impl StageTracker {
    pub(crate) fn new() -> Self {
        Self {
            stage: RequestStage::Received,
        }
    }

    pub(crate) fn start_at(stage: RequestStage) -> Self {
        Self { stage }
    }

    pub(crate) fn advance(&mut self, next: RequestStage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal stage transition {} -> {next}",
            self.stage
        );
        tracing::trace!(from = %self.stage, to = %next, "Query stage");
        self.stage = next;
    }

    pub(crate) fn stage(&self) -> RequestStage {
        self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_document_id_merges_into_scope() {
        let request: QueryRequest = serde_json::from_value(json!({
            "query": "revenue",
            "document_ids": ["doc-1", " doc-2 "],
            "document_id": "doc-1"
        }))
        .expect("request");
        assert_eq!(request.scoped_document_ids(), vec!["doc-1", "doc-2"]);
        assert_eq!(request.top_k, None);
    }

    #[test]
    fn criteria_errors_become_invalid_requests() {
        let mut criteria = Map::new();
        criteria.insert("year".into(), json!({"$gt": 1}));
        let request = QueryRequest {
            filter_criteria: Some(criteria),
            ..QueryRequest::new("q")
        };
        assert!(matches!(
            request.criteria_filter(),
            Err(RetrievalError::InvalidRequest(_))
        ));
    }

    #[test]
    fn stages_follow_the_pipeline() {
        use RequestStage::*;
        assert!(Received.can_advance_to(EmbeddingQuery));
        assert!(Searching.can_advance_to(Errored));
        assert!(PromptingLlm.can_advance_to(Errored));
        assert!(!ContextAssembled.can_advance_to(Errored));
        assert!(!Received.can_advance_to(Answered));
    }
}
