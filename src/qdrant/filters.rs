//! Translation of typed metadata filters into Qdrant filter JSON.

use serde_json::{Value, json};

use crate::store::MetadataFilter;

/// Render `filter` as a Qdrant `{"must": [...]}` filter.
///
/// Conjunctions are flattened into one `must` list; equality becomes `match.value` and set
/// membership becomes `match.any`.
pub fn to_qdrant_filter(filter: &MetadataFilter) -> Value {
    let mut must = Vec::new();
    push_conditions(filter, &mut must);
    json!({ "must": must })
}

fn push_conditions(filter: &MetadataFilter, must: &mut Vec<Value>) {
    match filter {
        MetadataFilter::Equals { field, value } => must.push(json!({
            "key": field,
            "match": { "value": value }
        })),
        MetadataFilter::In { field, values } => must.push(json!({
            "key": field,
            "match": { "any": values }
        })),
        MetadataFilter::And { filters } => {
            for nested in filters {
                push_conditions(nested, must);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_scope_becomes_match_any() {
        let filter = MetadataFilter::document_ids(["doc-1", "doc-2"]);
        assert_eq!(
            to_qdrant_filter(&filter),
            json!({
                "must": [
                    {
                        "key": "document_id",
                        "match": { "any": ["doc-1", "doc-2"] }
                    }
                ]
            })
        );
    }

    #[test]
    fn conjunctions_flatten_into_must() {
        let filter = MetadataFilter::equals("lang", "en").and(
            MetadataFilter::equals("kind", "report").and(MetadataFilter::document_ids(["doc-1"])),
        );
        assert_eq!(
            to_qdrant_filter(&filter),
            json!({
                "must": [
                    { "key": "lang", "match": { "value": "en" } },
                    { "key": "kind", "match": { "value": "report" } },
                    { "key": "document_id", "match": { "any": ["doc-1"] } }
                ]
            })
        );
    }
}
