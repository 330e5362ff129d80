//! Key-value store for client state that must survive restarts.
//!
//! Values are JSON documents in the `kv_store` table. The identity service
//! keeps the signed-in user and the pending verification here.

use chrono::Utc;
use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::Serialize;

use lc_core::error::{LcError, LcResult};

use crate::db::Database;

/// JSON key-value store backed by the `kv_store` table.
#[derive(Clone)]
pub struct LocalStore {
    db: Database,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get a raw string value for a key.
    pub fn get_raw(&self, key: &str) -> LcResult<Option<String>> {
        let conn = self.db.conn()?;
        match conn.query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
            row.get::<_, String>(0)
        }) {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(LcError::Database(e.to_string())),
        }
    }

    /// Set a raw string value for a key (upsert).
    pub fn set_raw(&self, key: &str, value: &str) -> LcResult<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )
        .map_err(|e| LcError::Database(e.to_string()))?;
        Ok(())
    }

    /// Get and decode a JSON value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> LcResult<Option<T>> {
        match self.get_raw(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| LcError::Serialization(format!("failed to parse stored {key}: {e}"))),
            None => Ok(None),
        }
    }

    /// Encode and store a JSON value.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> LcResult<()> {
        let json = serde_json::to_string(value)?;
        self.set_raw(key, &json)
    }

    /// Delete a key. Returns whether it existed.
    pub fn remove(&self, key: &str) -> LcResult<bool> {
        let conn = self.db.conn()?;
        let changed = conn
            .execute("DELETE FROM kv_store WHERE key = ?1", [key])
            .map_err(|e| LcError::Database(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Delete several keys at once.
    pub fn remove_many(&self, keys: &[&str]) -> LcResult<()> {
        self.db.transaction(|conn| {
            for key in keys {
                conn.execute("DELETE FROM kv_store WHERE key = ?1", [key])
                    .map_err(|e| LcError::Database(e.to_string()))?;
            }
            Ok(())
        })
    }
}
