//! SQLite-backed record store
//!
//! Records live as JSON text in a single `records` table. Equality filters
//! and sort orders are evaluated with `json_extract`, so any top-level field
//! of a record can be queried without per-kind tables.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::{schema, Fields, RecordQuery, RecordStore, SortDirection};
use crate::error::EngineError;

fn unavailable(context: &str, e: rusqlite::Error) -> EngineError {
    EngineError::StoreUnavailable(format!("{}: {}", context, e))
}

/// SQLite record store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the record store at `path`
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        info!("Opening SQLite record store at {:?}", path);

        let conn = Connection::open(path).map_err(|e| unavailable("Failed to open SQLite", e))?;

        // WAL for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| unavailable("Failed to set PRAGMA", e))?;

        Self::with_connection(conn)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self, EngineError> {
        debug!("Opening in-memory SQLite record store");

        let conn = Connection::open_in_memory()
            .map_err(|e| unavailable("Failed to open in-memory SQLite", e))?;

        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, EngineError> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, EngineError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::StoreUnavailable(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Record counts per kind
    pub fn stats(&self) -> Result<StoreStats, EngineError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT kind, COUNT(*) FROM records GROUP BY kind ORDER BY kind")
                .map_err(|e| unavailable("Prepare failed", e))?;

            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|e| unavailable("Query failed", e))?;

            let mut by_kind = BTreeMap::new();
            let mut total = 0u64;
            for row in rows {
                let (kind, count) = row.map_err(|e| unavailable("Row fetch failed", e))?;
                total += count as u64;
                by_kind.insert(kind, count as u64);
            }

            Ok(StoreStats { total, by_kind })
        })
    }
}

fn load_data(conn: &Connection, kind: &str, id: &str) -> Result<Option<Value>, EngineError> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM records WHERE kind = ? AND id = ?",
            params![kind, id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| unavailable("Query failed", e))?;

    data.map(|text| serde_json::from_str(&text).map_err(EngineError::from))
        .transpose()
}

/// Bind a JSON scalar the way `json_extract` reports it
fn bind_scalar(field: &str, value: &Value) -> Result<SqlValue, EngineError> {
    match value {
        Value::Bool(b) => Ok(SqlValue::Integer(*b as i64)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(SqlValue::Integer(i)),
            None => Ok(SqlValue::Real(n.as_f64().unwrap_or(0.0))),
        },
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        _ => Err(EngineError::InvalidInput(format!(
            "filter on '{}' must be a scalar",
            field
        ))),
    }
}

impl RecordStore for SqliteStore {
    fn create(&self, kind: &str, mut fields: Fields) -> Result<Value, EngineError> {
        let id = match fields.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        fields.insert("id".into(), Value::String(id.clone()));
        let record = Value::Object(fields);

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO records (kind, id, data) VALUES (?, ?, ?)",
                params![kind, id, record.to_string()],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref err, _)
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    EngineError::InvalidInput(format!("{} {} already exists", kind, id))
                }
                other => unavailable("Insert failed", other),
            })?;
            Ok(())
        })?;

        debug!(kind, id = %id, "Record created");
        Ok(record)
    }

    fn get(&self, kind: &str, id: &str) -> Result<Value, EngineError> {
        self.with_conn(|conn| load_data(conn, kind, id))?
            .ok_or_else(|| EngineError::not_found(kind, id))
    }

    fn update(&self, kind: &str, id: &str, mut fields: Fields) -> Result<Value, EngineError> {
        // The id is the key; it cannot be rewritten.
        fields.remove("id");

        self.with_conn(|conn| {
            let mut record = load_data(conn, kind, id)?
                .ok_or_else(|| EngineError::not_found(kind, id))?;

            if let Value::Object(ref mut existing) = record {
                existing.extend(fields);
            }

            let changed = conn
                .execute(
                    "UPDATE records SET data = ? WHERE kind = ? AND id = ?",
                    params![record.to_string(), kind, id],
                )
                .map_err(|e| unavailable("Update failed", e))?;

            if changed == 0 {
                return Err(EngineError::not_found(kind, id));
            }
            Ok(record)
        })
    }

    fn delete(&self, kind: &str, id: &str) -> Result<(), EngineError> {
        let deleted = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM records WHERE kind = ? AND id = ?",
                params![kind, id],
            )
            .map_err(|e| unavailable("Delete failed", e))
        })?;

        if deleted == 0 {
            return Err(EngineError::not_found(kind, id));
        }
        debug!(kind, id, "Record deleted");
        Ok(())
    }

    fn query(&self, kind: &str, query: &RecordQuery) -> Result<Vec<Value>, EngineError> {
        query.validate()?;

        let mut sql = String::from("SELECT data FROM records WHERE kind = ?");
        let mut bound: Vec<SqlValue> = vec![SqlValue::Text(kind.to_string())];

        for (field, value) in &query.filter {
            bound.push(SqlValue::Text(format!("$.{}", field)));
            if value.is_null() {
                sql.push_str(" AND json_extract(data, ?) IS NULL");
            } else {
                sql.push_str(" AND json_extract(data, ?) = ?");
                bound.push(bind_scalar(field, value)?);
            }
        }

        match query.sort {
            Some(ref sort) => {
                let direction = match sort.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                sql.push_str(&format!(" ORDER BY json_extract(data, ?) {}, seq ASC", direction));
                bound.push(SqlValue::Text(format!("$.{}", sort.field)));
            }
            None => sql.push_str(" ORDER BY seq ASC"),
        }

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bound.push(SqlValue::Integer(limit as i64));
        }

        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| unavailable("Prepare failed", e))?;

            let rows = stmt
                .query_map(rusqlite::params_from_iter(bound.iter()), |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| unavailable("Query failed", e))?;

            let mut records = Vec::new();
            for row in rows {
                let text = row.map_err(|e| unavailable("Row fetch failed", e))?;
                records.push(serde_json::from_str(&text)?);
            }
            Ok(records)
        })
    }
}

/// Record store statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub by_kind: BTreeMap<String, u64>,
}
