use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and query activity.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    documents_indexed: AtomicU64,
    chunks_indexed: AtomicU64,
    documents_failed: AtomicU64,
    documents_deleted: AtomicU64,
    retrievals: AtomicU64,
    retrieval_failures: AtomicU64,
    partial_collection_failures: AtomicU64,
    generations: AtomicU64,
    generation_failures: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an indexed document and the number of chunks written for it.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a document whose ingestion ended in the error state.
    pub fn record_document_failure(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a deleted document.
    pub fn record_deletion(&self) {
        self.documents_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful retrieval and how many collections failed during it.
    pub fn record_retrieval(&self, failed_collections: usize) {
        self.retrievals.fetch_add(1, Ordering::Relaxed);
        self.partial_collection_failures
            .fetch_add(failed_collections as u64, Ordering::Relaxed);
    }

    /// Record a retrieval that returned an error.
    pub fn record_retrieval_failure(&self) {
        self.retrieval_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an answered query.
    pub fn record_generation(&self) {
        self.generations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a query whose generation step failed.
    pub fn record_generation_failure(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            documents_deleted: self.documents_deleted.load(Ordering::Relaxed),
            retrievals: self.retrievals.load(Ordering::Relaxed),
            retrieval_failures: self.retrieval_failures.load(Ordering::Relaxed),
            partial_collection_failures: self.partial_collection_failures.load(Ordering::Relaxed),
            generations: self.generations.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents indexed since startup.
    pub documents_indexed: u64,
    /// Chunks written across all indexed documents.
    pub chunks_indexed: u64,
    /// Documents whose ingestion failed.
    pub documents_failed: u64,
    /// Documents deleted since startup.
    pub documents_deleted: u64,
    /// Retrievals that produced a result.
    pub retrievals: u64,
    /// Retrievals that returned an error.
    pub retrieval_failures: u64,
    /// Collection searches that failed or timed out inside otherwise successful retrievals.
    pub partial_collection_failures: u64,
    /// Answered queries.
    pub generations: u64,
    /// Queries whose generation step failed.
    pub generation_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_and_chunks() {
        let metrics = PipelineMetrics::new();
        metrics.record_document(2);
        metrics.record_document(3);
        metrics.record_document_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_indexed, 2);
        assert_eq!(snapshot.chunks_indexed, 5);
        assert_eq!(snapshot.documents_failed, 1);
    }

    #[test]
    fn partial_failures_accumulate_per_collection() {
        let metrics = PipelineMetrics::new();
        metrics.record_retrieval(0);
        metrics.record_retrieval(2);
        metrics.record_retrieval_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.retrievals, 2);
        assert_eq!(snapshot.partial_collection_failures, 2);
        assert_eq!(snapshot.retrieval_failures, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        assert_eq!(PipelineMetrics::new().snapshot(), MetricsSnapshot::default());
    }
}
