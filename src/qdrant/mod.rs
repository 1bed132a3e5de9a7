//! Qdrant vector store integration over the REST API.

pub mod client;
pub mod filters;
pub mod payload;
pub mod types;

pub use client::QdrantService;
pub use filters::to_qdrant_filter;
pub use payload::compute_chunk_hash;
pub use types::QdrantError;
