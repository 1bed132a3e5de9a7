#![deny(missing_docs)]

//! Core library for docrag, a retrieval-augmented question answering service over Qdrant.

/// HTTP routing and REST handlers.
pub mod api;
/// Document chunking strategies and their validated configuration.
pub mod chunking;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Document registry and the indexing write path.
pub mod ingest;
/// Language model client abstraction and adapters.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Qdrant vector store integration.
pub mod qdrant;
/// Retrieval and answer generation.
pub mod retrieval;
/// Service wiring shared by the HTTP surface and the CLI.
pub mod service;
/// Vector store abstraction, metadata filters and the in-memory store.
pub mod store;
