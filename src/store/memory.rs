//! Process-local `VectorStore` over cosine similarity. Collections live in a `RwLock` map and
//! vanish with the process.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MetadataFilter, VectorHit, VectorPoint, VectorStore, VectorStoreError};
use crate::chunking::cosine_similarity;

#[derive(Debug, Default)]
struct Collection {
    dimension: usize,
    points: HashMap<String, VectorPoint>,
}

/// Vector store kept in process memory, scored by cosine similarity.
///
/// Used by tests and by the offline CLI; filters are evaluated directly with
/// [`MetadataFilter::matches`].
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl InMemoryVectorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points stored in `collection`, or zero when it does not exist.
    pub async fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, |stored| stored.points.len())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                dimension,
                points: HashMap::new(),
            });
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<usize, VectorStoreError> {
        let mut collections = self.collections.write().await;
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::UnknownCollection(collection.to_string()))?;
        if let Some(point) = points
            .iter()
            .find(|point| point.vector.len() != stored.dimension)
        {
            return Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: stored.dimension,
                actual: point.vector.len(),
            });
        }
        let written = points.len();
        for point in points {
            stored.points.insert(point.id.clone(), point);
        }
        Ok(written)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>, VectorStoreError> {
        let collections = self.collections.read().await;
        let stored = collections
            .get(collection)
            .ok_or_else(|| VectorStoreError::UnknownCollection(collection.to_string()))?;

        let mut hits: Vec<VectorHit> = stored
            .points
            .values()
            .filter(|point| filter.is_none_or(|filter| filter.matches(&point.metadata)))
            .map(|point| VectorHit {
                id: point.id.clone(),
                content: point.content.clone(),
                metadata: point.metadata.clone(),
                score: cosine_similarity(&point.vector, vector) as f32,
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_matching(
        &self,
        collection: &str,
        filter: &MetadataFilter,
    ) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.write().await;
        if let Some(stored) = collections.get_mut(collection) {
            stored
                .points
                .retain(|_, point| !filter.matches(&point.metadata));
        }
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};

    fn point(id: &str, document: &str, vector: Vec<f32>) -> VectorPoint {
        let mut metadata = Map::new();
        metadata.insert("document_id".into(), Value::String(document.into()));
        VectorPoint {
            id: id.into(),
            vector,
            content: format!("content of {id}"),
            metadata,
        }
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_applies_filter() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 2).await.expect("collection");
        store
            .upsert(
                "docs",
                vec![
                    point("a", "doc-1", vec![1.0, 0.0]),
                    point("b", "doc-2", vec![0.9, 0.1]),
                    point("c", "doc-1", vec![0.0, 1.0]),
                ],
            )
            .await
            .expect("upsert");

        let hits = store
            .search("docs", &[1.0, 0.0], 10, None)
            .await
            .expect("search");
        let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let scope = MetadataFilter::document_ids(["doc-1"]);
        let hits = store
            .search("docs", &[1.0, 0.0], 10, Some(&scope))
            .await
            .expect("search");
        assert!(hits.iter().all(|hit| hit.metadata["document_id"] == json!("doc-1")));
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn upsert_replaces_by_id_and_checks_dimension() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 2).await.expect("collection");
        store
            .upsert("docs", vec![point("a", "doc-1", vec![1.0, 0.0])])
            .await
            .expect("upsert");
        store
            .upsert("docs", vec![point("a", "doc-1", vec![0.0, 1.0])])
            .await
            .expect("upsert");
        assert_eq!(store.point_count("docs").await, 1);

        let error = store
            .upsert("docs", vec![point("b", "doc-1", vec![1.0])])
            .await
            .expect_err("dimension");
        assert!(matches!(error, VectorStoreError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn delete_matching_and_unknown_collections() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 2).await.expect("collection");
        store
            .upsert(
                "docs",
                vec![
                    point("a", "doc-1", vec![1.0, 0.0]),
                    point("b", "doc-2", vec![1.0, 0.0]),
                ],
            )
            .await
            .expect("upsert");
        store
            .delete_matching("docs", &MetadataFilter::document_ids(["doc-1"]))
            .await
            .expect("delete");
        assert_eq!(store.point_count("docs").await, 1);

        assert!(matches!(
            store.search("missing", &[1.0, 0.0], 3, None).await,
            Err(VectorStoreError::UnknownCollection(_))
        ));
        assert_eq!(
            store.list_collections().await.expect("list"),
            vec!["docs".to_string()]
        );
    }
}
