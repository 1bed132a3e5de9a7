//! HTTP client wrapper for interacting with Qdrant.

use crate::qdrant::{
    filters::to_qdrant_filter,
    payload::{build_payload, current_timestamp_rfc3339, hit_from_query_point},
    types::{ListCollectionsResponse, QdrantError, QueryResponse, QueryResponseResult},
};
use crate::store::{
    CHUNK_INDEX_FIELD, DOCUMENT_ID_FIELD, MetadataFilter, VectorHit, VectorPoint, VectorStore,
    VectorStoreError,
};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

/// Lightweight HTTP client for Qdrant operations.
#[derive(Debug, Clone)]
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl QdrantService {
    /// Construct a client for the Qdrant instance at `url`.
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("docrag/0.1").build()?;

        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = %api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Create a collection only when it is missing from Qdrant, then ensure payload indexes.
    pub async fn create_collection_if_not_exists(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        if self.collection_exists(collection_name).await? {
            return Ok(());
        }

        tracing::debug!(
            collection = collection_name,
            vector_size,
            "Creating collection"
        );
        self.create_collection(collection_name, vector_size).await?;
        self.ensure_payload_indexes(collection_name).await
    }

    /// Create or update a collection with the specified vector size.
    pub async fn create_collection(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}"))?
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Collection ensured/created");
        })
        .await
    }

    /// Retrieve the names of all collections present in Qdrant.
    pub async fn list_collections(&self) -> Result<Vec<String>, QdrantError> {
        let response = self.request(Method::GET, "collections")?.send().await?;

        if response.status().is_success() {
            let payload: ListCollectionsResponse = response.json().await?;
            let names = payload
                .result
                .collections
                .into_iter()
                .map(|collection| collection.name)
                .collect();
            Ok(names)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Failed to list collections");
            Err(error)
        }
    }

    /// Upload points (vector, text and metadata) to the given collection, waiting for the write
    /// to be applied.
    pub async fn upsert_points(
        &self,
        collection_name: &str,
        points: Vec<VectorPoint>,
    ) -> Result<usize, QdrantError> {
        if points.is_empty() {
            return Ok(0);
        }

        let now = current_timestamp_rfc3339();
        let serialized: Vec<_> = points
            .iter()
            .map(|point| {
                json!({
                    "id": point.id,
                    "vector": point.vector,
                    "payload": build_payload(point, &now),
                })
            })
            .collect();

        let point_count = serialized.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{collection_name}/points"),
            )?
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = collection_name,
                points = point_count,
                "Points indexed"
            );
        })
        .await?;

        Ok(point_count)
    }

    /// Perform a similarity search against a collection. Each payload is split back into chunk
    /// text and metadata.
    pub async fn search_points(
        &self,
        collection_name: &str,
        vector: &[f32],
        filter: Option<Value>,
        limit: usize,
    ) -> Result<Vec<VectorHit>, QdrantError> {
        let mut body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let (Some(filter_value), Some(obj)) = (filter, body.as_object_mut()) {
            obj.insert("filter".into(), filter_value);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/query"),
            )?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = collection_name, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        Ok(points.into_iter().map(hit_from_query_point).collect())
    }

    /// Delete every point matching `filter`. A missing collection counts as already empty.
    pub async fn delete_points(
        &self,
        collection_name: &str,
        filter: Value,
    ) -> Result<(), QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/delete"),
            )?
            .query(&[("wait", true)])
            .json(&json!({ "filter": filter }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(collection = collection_name, "Delete skipped; collection missing");
            return Ok(());
        }

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Points deleted by filter");
        })
        .await
    }

    /// Ensure payload indexes exist for the fields used to scope searches and deletions.
    pub async fn ensure_payload_indexes(&self, collection_name: &str) -> Result<(), QdrantError> {
        let fields: [(&str, &str); 3] = [
            (DOCUMENT_ID_FIELD, "keyword"),
            (CHUNK_INDEX_FIELD, "integer"),
            ("chunk_hash", "keyword"),
        ];

        for (field, schema) in fields {
            let body = json!({
                "field_name": field,
                "field_schema": schema,
            });

            let response = self
                .request(Method::PUT, &format!("collections/{collection_name}/index"))?
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() {
                tracing::debug!(
                    collection = collection_name,
                    field,
                    schema,
                    "Payload index ensured"
                );
            } else if response.status() == StatusCode::CONFLICT {
                tracing::debug!(
                    collection = collection_name,
                    field,
                    schema,
                    "Payload index already exists"
                );
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::warn!(
                    collection = collection_name,
                    field,
                    schema,
                    error = %error,
                    "Failed to ensure payload index"
                );
            }
        }

        Ok(())
    }

    async fn collection_exists(&self, collection_name: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))?
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(
                    collection = collection_name,
                    error = %error,
                    "Collection existence check failed"
                );
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, QdrantError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        Ok(req)
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorStore for QdrantService {
    async fn ensure_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<(), VectorStoreError> {
        Ok(self
            .create_collection_if_not_exists(collection, dimension as u64)
            .await?)
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<usize, VectorStoreError> {
        Ok(self.upsert_points(collection, points).await?)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>, VectorStoreError> {
        Ok(self
            .search_points(collection, vector, filter.map(to_qdrant_filter), limit)
            .await?)
    }

    async fn delete_matching(
        &self,
        collection: &str,
        filter: &MetadataFilter,
    ) -> Result<(), VectorStoreError> {
        Ok(self
            .delete_points(collection, to_qdrant_filter(filter))
            .await?)
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        Ok(QdrantService::list_collections(self).await?)
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{GET, POST, PUT},
        MockServer,
    };
    use serde_json::Map;

    fn service(server: &MockServer) -> QdrantService {
        QdrantService::new(&server.base_url(), Some("secret".into())).expect("service")
    }

    #[tokio::test]
    async fn search_sends_translated_filter_and_splits_payload() {
        let server = MockServer::start_async().await;

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/query")
                    .header("api-key", "secret")
                    .json_body(json!({
                        "query": [0.5, 0.25],
                        "limit": 3,
                        "with_payload": true,
                        "filter": {
                            "must": [
                                { "key": "document_id", "match": { "any": ["doc-1"] } }
                            ]
                        }
                    }));
                then.status(200).json_body(json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": {
                        "points": [
                            {
                                "id": "7f1c6c1e-0000-5000-8000-000000000001",
                                "score": 0.42,
                                "payload": {
                                    "text": "Example",
                                    "document_id": "doc-1",
                                    "chunk_index": 0
                                }
                            }
                        ]
                    }
                }));
            })
            .await;

        let scope = MetadataFilter::document_ids(["doc-1"]);
        let client = service(&server);
        let hits = VectorStore::search(&client, "documents", &[0.5, 0.25], 3, Some(&scope))
            .await
            .expect("search request");

        mock.assert_async().await;
        assert_eq!(hits.len(), 1);
        let hit = &hits[0];
        assert_eq!(hit.id, "7f1c6c1e-0000-5000-8000-000000000001");
        assert!((hit.score - 0.42).abs() < f32::EPSILON);
        assert_eq!(hit.content, "Example");
        assert_eq!(hit.metadata["document_id"], Value::String("doc-1".into()));
    }

    #[tokio::test]
    async fn upsert_writes_full_points_and_waits() {
        let server = MockServer::start_async().await;

        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/documents/points")
                    .query_param("wait", "true")
                    .body_contains("\"text\":\"chunk body\"")
                    .body_contains("\"chunk_hash\"")
                    .body_contains("\"indexed_at\"");
                then.status(200)
                    .json_body(json!({"status": "ok", "result": {"status": "completed"}}));
            })
            .await;

        let mut metadata = Map::new();
        metadata.insert("document_id".into(), json!("doc-1"));
        let written = service(&server)
            .upsert_points(
                "documents",
                vec![VectorPoint {
                    id: "p1".into(),
                    vector: vec![0.5, 0.5],
                    content: "chunk body".into(),
                    metadata,
                }],
            )
            .await
            .expect("upsert");

        mock.assert_async().await;
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn delete_by_filter_tolerates_missing_collection() {
        let server = MockServer::start_async().await;

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/images/points/delete")
                    .json_body(json!({
                        "filter": {
                            "must": [
                                { "key": "document_id", "match": { "any": ["doc-9"] } }
                            ]
                        }
                    }));
                then.status(404).body("Not found: Collection `images` doesn't exist!");
            })
            .await;

        VectorStore::delete_matching(
            &service(&server),
            "images",
            &MetadataFilter::document_ids(["doc-9"]),
        )
        .await
        .expect("missing collection is not an error");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failed_search_surfaces_status() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/web_pages/points/query");
                then.status(500).body("boom");
            })
            .await;

        let error = VectorStore::search(&service(&server), "web_pages", &[0.1], 5, None)
            .await
            .expect_err("server error");
        assert!(matches!(
            error,
            VectorStoreError::Qdrant(QdrantError::UnexpectedStatus { status, .. })
                if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[tokio::test]
    async fn ensure_collection_creates_missing_collection_with_indexes() {
        let server = MockServer::start_async().await;

        let exists = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/documents");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/documents")
                    .json_body(json!({"vectors": {"size": 8, "distance": "Cosine"}}));
                then.status(200).json_body(json!({"result": true}));
            })
            .await;
        let index = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/documents/index");
                then.status(200).json_body(json!({"result": {}}));
            })
            .await;

        VectorStore::ensure_collection(&service(&server), "documents", 8)
            .await
            .expect("ensure");

        exists.assert_async().await;
        create.assert_async().await;
        index.assert_hits_async(3).await;
    }

    #[test]
    fn rejects_invalid_urls() {
        assert!(matches!(
            QdrantService::new("not a url", None),
            Err(QdrantError::InvalidUrl(_))
        ));
    }
}
