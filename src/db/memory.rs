//! In-memory record store
//!
//! Same semantics as the SQLite store; useful for tests and for embedding the
//! engine where durability is handled elsewhere.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use super::{compare_values, Fields, RecordQuery, RecordStore, SortDirection};
use crate::error::EngineError;

#[derive(Debug, Clone)]
struct StoredRecord {
    seq: u64,
    data: Value,
}

/// Record store held in a concurrent map keyed by (kind, id)
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<(String, String), StoredRecord>,
    next_seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records of a kind
    pub fn count(&self, kind: &str) -> usize {
        self.records.iter().filter(|entry| entry.key().0 == kind).count()
    }
}

fn key(kind: &str, id: &str) -> (String, String) {
    (kind.to_string(), id.to_string())
}

impl RecordStore for MemoryStore {
    fn create(&self, kind: &str, mut fields: Fields) -> Result<Value, EngineError> {
        let id = match fields.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        fields.insert("id".into(), Value::String(id.clone()));
        let data = Value::Object(fields);

        match self.records.entry(key(kind, &id)) {
            Entry::Occupied(_) => Err(EngineError::InvalidInput(format!(
                "{} {} already exists",
                kind, id
            ))),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                slot.insert(StoredRecord {
                    seq,
                    data: data.clone(),
                });
                Ok(data)
            }
        }
    }

    fn get(&self, kind: &str, id: &str) -> Result<Value, EngineError> {
        self.records
            .get(&key(kind, id))
            .map(|record| record.data.clone())
            .ok_or_else(|| EngineError::not_found(kind, id))
    }

    fn update(&self, kind: &str, id: &str, mut fields: Fields) -> Result<Value, EngineError> {
        fields.remove("id");

        let mut record = self
            .records
            .get_mut(&key(kind, id))
            .ok_or_else(|| EngineError::not_found(kind, id))?;

        if let Value::Object(ref mut existing) = record.data {
            existing.extend(fields);
        }
        Ok(record.data.clone())
    }

    fn delete(&self, kind: &str, id: &str) -> Result<(), EngineError> {
        self.records
            .remove(&key(kind, id))
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found(kind, id))
    }

    fn query(&self, kind: &str, query: &RecordQuery) -> Result<Vec<Value>, EngineError> {
        query.validate()?;

        let mut matched: Vec<StoredRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == kind && query.matches(&entry.value().data))
            .map(|entry| entry.value().clone())
            .collect();

        matched.sort_by(|a, b| {
            let by_field = match query.sort {
                Some(ref sort) => {
                    let left = a.data.get(&sort.field).unwrap_or(&Value::Null);
                    let right = b.data.get(&sort.field).unwrap_or(&Value::Null);
                    match sort.direction {
                        SortDirection::Asc => compare_values(left, right),
                        SortDirection::Desc => compare_values(right, left),
                    }
                }
                None => std::cmp::Ordering::Equal,
            };
            by_field.then(a.seq.cmp(&b.seq))
        });

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        Ok(matched.into_iter().map(|record| record.data).collect())
    }
}
