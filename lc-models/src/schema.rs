//! Local database schema.
//!
//! Three groups of tables live in the client database:
//! - `kv_store`: persisted client state (signed-in user, pending verification)
//! - `backend_rows`: JSON rows of the offline backend, one table for all relations
//! - `auth_users` / `auth_session`: credentials and the current session of the offline backend

use rusqlite::Connection;
use lc_core::error::{LcError, LcResult};
use tracing::debug;

/// Create all database tables and indexes if they do not exist.
pub fn create_tables(conn: &Connection) -> LcResult<()> {
    conn.execute_batch(SCHEMA_SQL)
        .map_err(|e| LcError::Database(format!("failed to create schema: {e}")))?;
    debug!("database schema verified");
    Ok(())
}

/// Drop all tables (used for database reset).
pub fn drop_tables(conn: &Connection) -> LcResult<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS auth_session;
         DROP TABLE IF EXISTS auth_users;
         DROP TABLE IF EXISTS backend_rows;
         DROP TABLE IF EXISTS kv_store;
         DROP TABLE IF EXISTS schema_version;",
    )
    .map_err(|e| LcError::Database(format!("failed to drop tables: {e}")))?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS kv_store (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

-- seq gives insertion order, which is the delivery order within a chat
CREATE TABLE IF NOT EXISTS backend_rows (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    relation    TEXT NOT NULL,
    id          TEXT NOT NULL,
    data        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE (relation, id)
);

CREATE INDEX IF NOT EXISTS idx_backend_rows_relation ON backend_rows(relation, created_at);

CREATE TABLE IF NOT EXISTS auth_users (
    id              TEXT PRIMARY KEY,
    phone           TEXT NOT NULL UNIQUE,
    password_salt   TEXT NOT NULL,
    password_hash   TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS auth_session (
    slot            INTEGER PRIMARY KEY CHECK (slot = 1),
    access_token    TEXT NOT NULL,
    user_id         TEXT NOT NULL REFERENCES auth_users(id) ON DELETE CASCADE,
    expires_at      TEXT
);
"#;
