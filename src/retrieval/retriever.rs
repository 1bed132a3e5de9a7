//! Query embedding, concurrent collection search, de-duplication and context assembly.

use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout_at;

use super::context::{assemble_context, source_label};
use super::types::{
    CollectionFailure, DEFAULT_TOP_K, MergeMode, QueryRequest, RequestStage, RetrievalError,
    RetrievalMetrics, RetrievalResult, RetrievedChunk, StageTracker,
};
use crate::chunking::{TokenCounter, cl100k_token_counter};
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::store::{CHUNK_INDEX_FIELD, DOCUMENT_ID_FIELD, MetadataFilter, VectorStore};

/// Values the retriever needs from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverSettings {
    /// Collections searched when a request names none.
    pub collections: Vec<String>,
    /// `top_k` used when a request does not set one.
    pub default_top_k: usize,
    /// Token budget for the assembled context.
    pub max_context_tokens: usize,
    /// Deadline shared by all per-collection searches of one request.
    pub search_timeout: Duration,
    /// How per-collection results are combined.
    pub merge_mode: MergeMode,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            collections: vec![
                "documents".to_string(),
                "images".to_string(),
                "web_pages".to_string(),
            ],
            default_top_k: DEFAULT_TOP_K,
            max_context_tokens: 3000,
            search_timeout: Duration::from_secs(5),
            merge_mode: MergeMode::Global,
        }
    }
}

/// Retrieves ranked, attributed context for a query.
#[derive(Clone)]
pub struct RagRetriever {
    embedder: Arc<dyn EmbeddingClient + Send + Sync>,
    store: Arc<dyn VectorStore>,
    token_counter: TokenCounter,
    settings: RetrieverSettings,
}

impl RagRetriever {
    /// Build a retriever counting context tokens with `cl100k_base`.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient + Send + Sync>,
        store: Arc<dyn VectorStore>,
        settings: RetrieverSettings,
    ) -> Self {
        Self {
            embedder,
            store,
            token_counter: cl100k_token_counter(),
            settings,
        }
    }

    /// Replace the token counter used for the context budget.
    pub fn with_token_counter(mut self, counter: TokenCounter) -> Self {
        self.token_counter = counter;
        self
    }

    /// Settings this retriever was built with.
    pub fn settings(&self) -> &RetrieverSettings {
        &self.settings
    }

    /// Retrieve for a JSON-level request. `top_k` falls back to the configured default.
    pub async fn retrieve(
        &self,
        request: &QueryRequest,
    ) -> Result<RetrievalResult, RetrievalError> {
        let filter = request.criteria_filter()?;
        let document_ids = request.scoped_document_ids();
        let top_k = request.top_k.unwrap_or(self.settings.default_top_k);
        self.retrieve_for_rag(
            &request.query,
            &request.collection_names,
            filter.as_ref(),
            &document_ids,
            top_k,
        )
        .await
    }

    /// Embed `query`, search every requested collection concurrently, merge, de-duplicate and
    /// assemble a token-bounded context.
    ///
    /// An empty `collection_names` searches the configured defaults. A non-empty
    /// `document_ids` restricts hits to those documents on top of `filter`. Individual
    /// collection failures and timeouts are logged and reported in the metrics; only the
    /// failure of every collection is an error.
    pub async fn retrieve_for_rag(
        &self,
        query: &str,
        collection_names: &[String],
        filter: Option<&MetadataFilter>,
        document_ids: &[String],
        top_k: usize,
    ) -> Result<RetrievalResult, RetrievalError> {
        let started = Instant::now();
        let mut stage = StageTracker::new();

        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidRequest(
                "query must not be empty".to_string(),
            ));
        }
        if top_k == 0 {
            return Err(RetrievalError::InvalidRequest(
                "top_k must be greater than zero".to_string(),
            ));
        }
        let collections = self.resolve_collections(collection_names);
        if collections.is_empty() {
            return Err(RetrievalError::InvalidRequest(
                "no collections to search".to_string(),
            ));
        }
        let effective_filter = scope_filter(filter, document_ids);

        stage.advance(RequestStage::EmbeddingQuery);
        let embedding_started = Instant::now();
        let vector = match self.embed_query(query).await {
            Ok(vector) => vector,
            Err(error) => {
                tracing::error!(
                    stage = %stage.stage(),
                    error = %error,
                    "Retrieval failed"
                );
                stage.advance(RequestStage::Errored);
                return Err(error);
            }
        };
        let embedding_time_ms = elapsed_ms(embedding_started);

        stage.advance(RequestStage::Searching);
        let search_started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.settings.search_timeout;
        let query_vector = vector.as_slice();
        let search_filter = effective_filter.as_ref();
        let searches = collections.iter().map(move |collection| {
            let vector = query_vector;
            let filter = search_filter;
            async move {
                let outcome = timeout_at(
                    deadline,
                    self.store.search(collection, vector, top_k, filter),
                )
                .await;
                (collection.clone(), outcome)
            }
        });
        let outcomes = join_all(searches).await;
        let search_time_ms = elapsed_ms(search_started);

        let mut candidates: Vec<RetrievedChunk> = Vec::new();
        let mut failures: Vec<CollectionFailure> = Vec::new();
        for (collection, outcome) in outcomes {
            let reason = match outcome {
                Ok(Ok(hits)) => {
                    tracing::debug!(
                        collection = %collection,
                        hits = hits.len(),
                        "Collection searched"
                    );
                    candidates.extend(hits.into_iter().map(|hit| RetrievedChunk {
                        source: source_label(&hit.metadata, &hit.id),
                        id: hit.id,
                        collection: collection.clone(),
                        content: hit.content,
                        metadata: hit.metadata,
                        score: hit.score,
                    }));
                    continue;
                }
                Ok(Err(error)) => error.to_string(),
                Err(_) => format!(
                    "timed out after {} ms",
                    self.settings.search_timeout.as_millis()
                ),
            };
            tracing::warn!(
                collection = %collection,
                reason = %reason,
                "Collection search failed; continuing without it"
            );
            failures.push(CollectionFailure { collection, reason });
        }

        if failures.len() == collections.len() {
            tracing::error!(
                stage = %stage.stage(),
                failed = failures.len(),
                "Retrieval failed"
            );
            stage.advance(RequestStage::Errored);
            return Err(RetrievalError::AllCollectionsFailed { failures });
        }

        let total_candidates = candidates.len();
        let mut ranked = deduplicate(candidates);
        let deduplicated = ranked.len();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.collection.cmp(&b.collection))
                .then_with(|| a.id.cmp(&b.id))
        });
        if self.settings.merge_mode == MergeMode::Global {
            ranked.truncate(top_k);
        }
        let returned = ranked.len();

        let assembled = assemble_context(
            ranked
                .iter()
                .map(|chunk| (chunk.source.as_str(), chunk.content.as_str())),
            self.settings.max_context_tokens,
            &self.token_counter,
        );
        ranked.truncate(assembled.included);
        stage.advance(RequestStage::ContextAssembled);

        let metrics = RetrievalMetrics {
            retrieval_time_ms: elapsed_ms(started),
            embedding_time_ms,
            search_time_ms,
            total_candidates,
            deduplicated,
            returned,
            in_context: assembled.included,
            context_tokens: assembled.tokens,
            collections_searched: collections,
            failed_collections: failures,
        };
        tracing::info!(
            retrieval_ms = metrics.retrieval_time_ms,
            candidates = total_candidates,
            returned,
            in_context = metrics.in_context,
            failed_collections = metrics.failed_collections.len(),
            "Retrieval completed"
        );

        Ok(RetrievalResult {
            query: query.to_string(),
            documents: ranked,
            context: assembled.text,
            metrics,
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RetrievalError> {
        let embeddings = self
            .embedder
            .generate_embeddings(vec![query.to_string()])
            .await
            .map_err(RetrievalError::QueryEmbedding)?;
        embeddings
            .into_iter()
            .next()
            .filter(|vector| !vector.is_empty())
            .ok_or_else(|| {
                RetrievalError::QueryEmbedding(EmbeddingClientError::InvalidResponse(
                    "provider returned no query vector".to_string(),
                ))
            })
    }

    fn resolve_collections(&self, requested: &[String]) -> Vec<String> {
        let source = if requested.iter().any(|name| !name.trim().is_empty()) {
            requested
        } else {
            &self.settings.collections
        };
        let mut collections: Vec<String> = Vec::new();
        let names = source
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty());
        for name in names {
            if !collections.iter().any(|existing| existing == name) {
                collections.push(name.to_string());
            }
        }
        collections
    }
}

impl std::fmt::Debug for RagRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagRetriever")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn scope_filter(
    filter: Option<&MetadataFilter>,
    document_ids: &[String],
) -> Option<MetadataFilter> {
    let scope = (!document_ids.is_empty())
        .then(|| MetadataFilter::document_ids(document_ids.iter().cloned()));
    match (filter.cloned(), scope) {
        (Some(filter), Some(scope)) => Some(filter.and(scope)),
        (Some(filter), None) => Some(filter),
        (None, scope) => scope,
    }
}

/// Keep one hit per chunk identity, preferring the higher score. Identity is
/// `(document_id, chunk_index)` when both are present, the point id otherwise.
fn deduplicate(candidates: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<RetrievedChunk> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let key = chunk_identity(&candidate);
        match positions.get(&key) {
            Some(&position) => {
                if candidate.score > unique[position].score {
                    unique[position] = candidate;
                }
            }
            None => {
                positions.insert(key, unique.len());
                unique.push(candidate);
            }
        }
    }
    unique
}

fn chunk_identity(chunk: &RetrievedChunk) -> String {
    let document = chunk
        .metadata
        .get(DOCUMENT_ID_FIELD)
        .and_then(|value| value.as_str());
    let index = chunk
        .metadata
        .get(CHUNK_INDEX_FIELD)
        .and_then(|value| value.as_u64());
    match (document, index) {
        (Some(document), Some(index)) => format!("{document}#{index}"),
        _ => format!("id:{}", chunk.id),
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
