//! Helpers for constructing, hashing and reading Qdrant payloads.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::qdrant::types::QueryPoint;
use crate::store::{VectorHit, VectorPoint};

/// Payload key holding the chunk text.
pub(crate) const TEXT_KEY: &str = "text";

/// Build the payload stored alongside a point: metadata fields flattened at the top level, the
/// chunk text under `text`, plus `chunk_hash` and `indexed_at`.
pub(crate) fn build_payload(point: &VectorPoint, indexed_at: &str) -> Value {
    let mut payload = point.metadata.clone();
    payload.insert(
        "chunk_hash".into(),
        Value::String(compute_chunk_hash(&point.content)),
    );
    payload.insert("indexed_at".into(), Value::String(indexed_at.to_string()));
    payload.insert(TEXT_KEY.into(), Value::String(point.content.clone()));
    Value::Object(payload)
}

/// Turn a query result into a search hit, splitting its payload back into chunk text and
/// metadata.
pub(crate) fn hit_from_query_point(point: QueryPoint) -> VectorHit {
    let mut metadata = point.payload.unwrap_or_default();
    let content = match metadata.remove(TEXT_KEY) {
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    VectorHit {
        id: point_id_string(point.id),
        content,
        metadata,
        score: point.score,
    }
}

/// Qdrant ids come back as strings, integers or `{"uuid": ...}` objects.
fn point_id_string(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Object(map) => match map.get("uuid") {
            Some(Value::String(uuid)) => uuid.clone(),
            Some(other) => other.to_string(),
            None => Value::Object(map).to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
