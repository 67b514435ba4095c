//! Record store adapter
//!
//! The engine talks to storage through five operation shapes only:
//! create, get, update, delete and query (equality filter + sort + limit).
//! No joins, transactions or cascades are assumed.
//!
//! ## Architecture
//!
//! ```text
//! Services (typed records)
//!     ↓  insert / fetch / patch / remove / find
//! RecordStore (JSON documents by kind + id)
//!     ↓
//! SqliteStore | MemoryStore
//! ```
//!
//! Ties on the sort field, and unsorted results, come back in insertion
//! order so creation order stays stable when timestamps collide.

pub mod memory;
pub mod models;
pub mod schema;
pub mod sqlite;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::EngineError;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, StoreStats};

/// JSON object fields of a record
pub type Fields = Map<String, Value>;

/// Generic store of JSON records grouped by kind
pub trait RecordStore: Send + Sync {
    /// Create a record. An `id` is generated when `fields` carries none.
    fn create(&self, kind: &str, fields: Fields) -> Result<Value, EngineError>;

    /// Get a record by ID, `NotFound` if absent
    fn get(&self, kind: &str, id: &str) -> Result<Value, EngineError>;

    /// Shallow-merge `fields` into an existing record and return it
    fn update(&self, kind: &str, id: &str, fields: Fields) -> Result<Value, EngineError>;

    /// Delete a record by ID, `NotFound` if absent
    fn delete(&self, kind: &str, id: &str) -> Result<(), EngineError>;

    /// Query records of a kind
    fn query(&self, kind: &str, query: &RecordQuery) -> Result<Vec<Value>, EngineError>;
}

// ============================================================================
// Query Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort on a single top-level field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    pub field: String,
    pub direction: SortDirection,
}

/// Equality filter, optional sort and result-size limit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    pub filter: BTreeMap<String, Value>,
    pub sort: Option<SortOrder>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`
    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filter.insert(field.to_string(), value.into());
        self
    }

    pub fn sort_asc(mut self, field: &str) -> Self {
        self.sort = Some(SortOrder {
            field: field.to_string(),
            direction: SortDirection::Asc,
        });
        self
    }

    pub fn sort_desc(mut self, field: &str) -> Self {
        self.sort = Some(SortOrder {
            field: field.to_string(),
            direction: SortDirection::Desc,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `record` satisfies every equality filter
    pub fn matches(&self, record: &Value) -> bool {
        self.filter
            .iter()
            .all(|(field, expected)| record.get(field).unwrap_or(&Value::Null) == expected)
    }

    /// Reject field names that are not plain identifiers
    pub fn validate(&self) -> Result<(), EngineError> {
        for field in self.filter.keys() {
            validate_field(field)?;
        }
        if let Some(ref sort) = self.sort {
            validate_field(&sort.field)?;
        }
        Ok(())
    }
}

/// Field names are restricted to `[A-Za-z0-9_]+`
pub fn validate_field(field: &str) -> Result<(), EngineError> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(EngineError::InvalidInput(format!("invalid field name '{}'", field)));
    }
    Ok(())
}

/// Total order over JSON scalars used for sorting: null < bool < number < string
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

// ============================================================================
// Typed Records
// ============================================================================

/// A typed record kind stored through a `RecordStore`
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Kind name used as the store's record type
    const KIND: &'static str;

    fn id(&self) -> &str;
}

fn to_fields<T: Serialize>(value: &T) -> Result<Fields, EngineError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(EngineError::Internal(format!(
            "record must serialize to an object, got {}",
            other
        ))),
    }
}

/// Create a typed record
pub fn insert<T, S>(store: &S, record: &T) -> Result<T, EngineError>
where
    T: Record,
    S: RecordStore + ?Sized,
{
    let created = store.create(T::KIND, to_fields(record)?)?;
    Ok(serde_json::from_value(created)?)
}

/// Get a typed record, `NotFound` if absent
pub fn fetch<T, S>(store: &S, id: &str) -> Result<T, EngineError>
where
    T: Record,
    S: RecordStore + ?Sized,
{
    Ok(serde_json::from_value(store.get(T::KIND, id)?)?)
}

/// Get a typed record, `None` if absent
pub fn fetch_optional<T, S>(store: &S, id: &str) -> Result<Option<T>, EngineError>
where
    T: Record,
    S: RecordStore + ?Sized,
{
    match fetch(store, id) {
        Ok(record) => Ok(Some(record)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Update fields of a typed record. `changes` must be a JSON object.
pub fn patch<T, S>(store: &S, id: &str, changes: Value) -> Result<T, EngineError>
where
    T: Record,
    S: RecordStore + ?Sized,
{
    let fields = match changes {
        Value::Object(map) => map,
        other => {
            return Err(EngineError::Internal(format!(
                "patch must be an object, got {}",
                other
            )))
        }
    };
    Ok(serde_json::from_value(store.update(T::KIND, id, fields)?)?)
}

/// Delete a typed record
pub fn remove<T, S>(store: &S, id: &str) -> Result<(), EngineError>
where
    T: Record,
    S: RecordStore + ?Sized,
{
    store.delete(T::KIND, id)
}

/// Query typed records
pub fn find<T, S>(store: &S, query: &RecordQuery) -> Result<Vec<T>, EngineError>
where
    T: Record,
    S: RecordStore + ?Sized,
{
    store
        .query(T::KIND, query)?
        .into_iter()
        .map(|value| serde_json::from_value(value).map_err(EngineError::from))
        .collect()
}

/// First record matching a query
pub fn find_first<T, S>(store: &S, query: RecordQuery) -> Result<Option<T>, EngineError>
where
    T: Record,
    S: RecordStore + ?Sized,
{
    Ok(find(store, &query.limit(1))?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_matches_equality_filters() {
        let query = RecordQuery::new()
            .filter("learner_id", "u1")
            .filter("is_completed", true);

        assert!(query.matches(&json!({"learner_id": "u1", "is_completed": true})));
        assert!(!query.matches(&json!({"learner_id": "u1", "is_completed": false})));
        assert!(!query.matches(&json!({"learner_id": "u1"})));
    }

    #[test]
    fn test_null_filter_matches_missing_field() {
        let query = RecordQuery::new().filter("parent_reply_id", Value::Null);
        assert!(query.matches(&json!({"id": "r1"})));
        assert!(query.matches(&json!({"id": "r1", "parent_reply_id": null})));
        assert!(!query.matches(&json!({"id": "r1", "parent_reply_id": "r0"})));
    }

    #[test]
    fn test_validate_rejects_path_injection() {
        let query = RecordQuery::new().filter("a') OR 1=1 --", "x");
        assert!(matches!(query.validate(), Err(EngineError::InvalidInput(_))));
        assert!(RecordQuery::new().sort_desc("created_at").validate().is_ok());
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!(false), &json!(true)), Ordering::Less);
    }
}
