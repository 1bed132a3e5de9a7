//! Retrieval-augmented query pipeline: retrieve scoped context, then answer from it.

mod context;
mod generator;
mod retriever;
mod types;

pub use context::source_label;
pub use generator::{
    GenerationError, GenerationMetrics, GenerationResult, QueryError, RagGenerator, render_prompt,
};
pub use retriever::{RagRetriever, RetrieverSettings};
pub use types::{
    CollectionFailure, DEFAULT_TOP_K, MergeMode, QueryRequest, RequestStage, RetrievalError,
    RetrievalMetrics, RetrievalResult, RetrievedChunk,
};
