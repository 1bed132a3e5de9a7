//! Typed metadata predicates shared by every vector store backend.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Metadata field holding the owning document's identifier.
pub const DOCUMENT_ID_FIELD: &str = "document_id";
/// Metadata field holding the chunk's position within its document.
pub const CHUNK_INDEX_FIELD: &str = "chunk_index";

/// Conjunctive equality/containment predicate over named metadata fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MetadataFilter {
    /// Field equals `value`, or contains it when the field is an array.
    Equals {
        /// Metadata field name.
        field: String,
        /// Expected value.
        value: Value,
    },
    /// Field equals any of `values`.
    In {
        /// Metadata field name.
        field: String,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// Every nested predicate holds.
    And {
        /// Nested predicates.
        filters: Vec<MetadataFilter>,
    },
}

/// Filter criteria that cannot be expressed as a [`MetadataFilter`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// Operator other than `$eq` / `$in`.
    #[error("unsupported operator '{operator}' on field '{field}'")]
    UnsupportedOperator {
        /// Field the operator was applied to.
        field: String,
        /// Rejected operator.
        operator: String,
    },
    /// Operator value has the wrong shape.
    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue {
        /// Field carrying the value.
        field: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl MetadataFilter {
    /// Equality predicate.
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Set-membership predicate.
    pub fn any_of<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Scope to chunks of the given documents.
    pub fn document_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::any_of(
            DOCUMENT_ID_FIELD,
            ids.into_iter().map(|id| Value::String(id.into())),
        )
    }

    /// Conjunction of `self` and `other`, flattening nested conjunctions.
    pub fn and(self, other: MetadataFilter) -> Self {
        let mut filters = Vec::new();
        for filter in [self, other] {
            match filter {
                Self::And { filters: nested } => filters.extend(nested),
                single => filters.push(single),
            }
        }
        Self::And { filters }
    }

    /// Evaluate the predicate against a metadata map.
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        match self {
            Self::Equals { field, value } => metadata
                .get(field)
                .is_some_and(|actual| value_matches(actual, value)),
            Self::In { field, values } => metadata.get(field).is_some_and(|actual| {
                values.iter().any(|candidate| value_matches(actual, candidate))
            }),
            Self::And { filters } => filters.iter().all(|filter| filter.matches(metadata)),
        }
    }

    /// Build a filter from loosely-typed criteria.
    ///
    /// Accepted shapes per field: a scalar (equality), an array (membership),
    /// `{"$eq": value}` and `{"$in": [values]}`. Returns `None` for an empty map.
    pub fn from_criteria(criteria: &Map<String, Value>) -> Result<Option<Self>, FilterError> {
        let mut filters = Vec::with_capacity(criteria.len());
        for (field, raw) in criteria {
            filters.push(criterion(field, raw)?);
        }
        Ok(match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Self::And { filters }),
        })
    }
}

fn criterion(field: &str, raw: &Value) -> Result<MetadataFilter, FilterError> {
    match raw {
        Value::Array(values) => Ok(MetadataFilter::any_of(field, values.iter().cloned())),
        Value::Object(operators) => {
            let mut parts = Vec::with_capacity(operators.len());
            for (operator, value) in operators {
                match operator.as_str() {
                    "$eq" => parts.push(MetadataFilter::equals(field, value.clone())),
                    "$in" => {
                        let values = value.as_array().ok_or_else(|| FilterError::InvalidValue {
                            field: field.to_string(),
                            reason: "$in expects an array".to_string(),
                        })?;
                        parts.push(MetadataFilter::any_of(field, values.iter().cloned()));
                    }
                    other => {
                        return Err(FilterError::UnsupportedOperator {
                            field: field.to_string(),
                            operator: other.to_string(),
                        });
                    }
                }
            }
            match parts.len() {
                0 => Err(FilterError::InvalidValue {
                    field: field.to_string(),
                    reason: "empty operator object".to_string(),
                }),
                1 => Ok(parts.remove(0)),
                _ => Ok(MetadataFilter::And { filters: parts }),
            }
        }
        Value::Null => Err(FilterError::InvalidValue {
            field: field.to_string(),
            reason: "null is not a filterable value".to_string(),
        }),
        scalar => Ok(MetadataFilter::equals(field, scalar.clone())),
    }
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| scalar_eq(item, expected)),
        _ => scalar_eq(actual, expected),
    }
}

fn scalar_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn document_scope_matches_only_listed_documents() {
        let filter = MetadataFilter::document_ids(["doc-1", "doc-3"]);
        assert!(filter.matches(&metadata(json!({"document_id": "doc-1"}))));
        assert!(!filter.matches(&metadata(json!({"document_id": "doc-2"}))));
        assert!(!filter.matches(&metadata(json!({"title": "doc-1"}))));
    }

    #[test]
    fn and_flattens_and_requires_every_part() {
        let filter = MetadataFilter::equals("lang", "en")
            .and(MetadataFilter::equals("kind", "report"))
            .and(MetadataFilter::document_ids(["doc-1"]));
        let MetadataFilter::And { filters } = &filter else {
            panic!("expected conjunction");
        };
        assert_eq!(filters.len(), 3);
        assert!(filter.matches(&metadata(
            json!({"lang": "en", "kind": "report", "document_id": "doc-1"})
        )));
        assert!(!filter.matches(&metadata(
            json!({"lang": "de", "kind": "report", "document_id": "doc-1"})
        )));
    }

    #[test]
    fn array_fields_match_by_containment() {
        let filter = MetadataFilter::equals("tags", "finance");
        assert!(filter.matches(&metadata(json!({"tags": ["ops", "finance"]}))));
        assert!(!filter.matches(&metadata(json!({"tags": ["ops"]}))));
    }

    #[test]
    fn integer_and_float_numbers_compare_equal() {
        let filter = MetadataFilter::equals("chunk_index", 2);
        assert!(filter.matches(&metadata(json!({"chunk_index": 2.0}))));
    }

    #[test]
    fn criteria_convert_each_supported_shape() {
        let criteria = metadata(json!({
            "author": "ana",
            "lang": ["en", "fr"],
            "kind": {"$eq": "report"},
            "document_id": {"$in": ["doc-1"]}
        }));
        let filter = MetadataFilter::from_criteria(&criteria)
            .expect("valid")
            .expect("non-empty");
        assert!(filter.matches(&metadata(json!({
            "author": "ana", "lang": "fr", "kind": "report", "document_id": "doc-1"
        }))));
        assert!(!filter.matches(&metadata(json!({
            "author": "ana", "lang": "de", "kind": "report", "document_id": "doc-1"
        }))));
    }

    #[test]
    fn criteria_reject_unknown_operators() {
        let criteria = metadata(json!({"year": {"$gt": 2020}}));
        let error = MetadataFilter::from_criteria(&criteria).unwrap_err();
        assert_eq!(
            error,
            FilterError::UnsupportedOperator {
                field: "year".into(),
                operator: "$gt".into()
            }
        );
        assert_eq!(MetadataFilter::from_criteria(&Map::new()), Ok(None));
    }
}
