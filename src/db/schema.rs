//! SQLite schema for the record store

use rusqlite::Connection;
use tracing::info;

use crate::error::EngineError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), EngineError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new record store schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(EngineError::StoreUnavailable(format!(
            "Record store schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, EngineError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| EngineError::StoreUnavailable(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), EngineError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| EngineError::StoreUnavailable(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| EngineError::StoreUnavailable(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(RECORDS_SCHEMA)
        .map_err(|e| EngineError::StoreUnavailable(format!("Failed to create records table: {}", e)))?;
    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), EngineError> {
    info!(from_version, "No migration steps registered");
    set_schema_version(conn, SCHEMA_VERSION)
}

/// One table of JSON documents; `seq` preserves insertion order
const RECORDS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE (kind, id)
);

CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind, seq);
"#;
