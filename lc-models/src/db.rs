//! Database initialization, connection pooling, and lifecycle management.
//!
//! Uses SQLite (WAL mode by default) behind an r2d2 pool. Integrity checks
//! and migrations run once at startup.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{error, info, warn};

use lc_core::config::DatabaseConfig;
use lc_core::error::{LcError, LcResult};

use crate::migrations;
use crate::schema;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled SQLite database shared by the store and the offline backend.
#[derive(Clone)]
pub struct Database {
    pool: Arc<DbPool>,
}

impl Database {
    /// Open (creating if needed) the database at `db_path`, then verify the
    /// schema and apply pending migrations.
    pub fn init(db_path: &Path, config: &DatabaseConfig) -> LcResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("initializing database at {}", db_path.display());

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .connection_customizer(Box::new(ConnectionCustomizer {
                wal_mode: config.wal_mode,
            }))
            .build(manager)
            .map_err(|e| LcError::Pool(e.to_string()))?;

        let db = Self {
            pool: Arc::new(pool),
        };

        if config.integrity_check_on_startup {
            db.run_integrity_check()?;
        }

        {
            let conn = db.conn()?;
            schema::create_tables(&conn)?;
            migrations::run_migrations(&conn)?;
        }

        info!("database ready");
        Ok(db)
    }

    /// Get a connection from the pool.
    pub fn conn(&self) -> LcResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| LcError::Pool(e.to_string()))
    }

    /// Run a SQLite integrity check.
    pub fn run_integrity_check(&self) -> LcResult<()> {
        let conn = self.conn()?;
        let result: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(|e| LcError::Database(e.to_string()))?;

        if result != "ok" {
            error!("database integrity check failed: {result}");
            return Err(LcError::IntegrityCheck(result));
        }
        Ok(())
    }

    /// Execute a function within a database transaction.
    pub fn transaction<T, F>(&self, f: F) -> LcResult<T>
    where
        F: FnOnce(&Connection) -> LcResult<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| LcError::Database(e.to_string()))?;

        let result = f(&tx)?;

        tx.commit().map_err(|e| LcError::Database(e.to_string()))?;
        Ok(result)
    }

    /// Row counts for the CLI `db stats` command.
    pub fn stats(&self) -> LcResult<DatabaseStats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> LcResult<i64> {
            conn.query_row(sql, [], |row| row.get(0))
                .map_err(|e| LcError::Database(e.to_string()))
        };

        let mut rows = BTreeMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT relation, COUNT(*) FROM backend_rows GROUP BY relation")
                .map_err(|e| LcError::Database(e.to_string()))?;
            let iter = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|e| LcError::Database(e.to_string()))?;
            for entry in iter {
                let (relation, n) = entry.map_err(|e| LcError::Database(e.to_string()))?;
                rows.insert(relation, n);
            }
        }

        Ok(DatabaseStats {
            stored_keys: count("SELECT COUNT(*) FROM kv_store")?,
            auth_users: count("SELECT COUNT(*) FROM auth_users")?,
            rows,
        })
    }

    /// Reset the database by dropping and recreating all tables.
    pub fn reset(&self) -> LcResult<()> {
        warn!("resetting database - all local data will be lost");
        let conn = self.conn()?;
        schema::drop_tables(&conn)?;
        schema::create_tables(&conn)?;
        migrations::run_migrations(&conn)?;
        Ok(())
    }
}

/// Row counts per table group.
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    pub stored_keys: i64,
    pub auth_users: i64,
    /// Offline backend rows keyed by relation name.
    pub rows: BTreeMap<String, i64>,
}

impl std::fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stored_keys={}, auth_users={}", self.stored_keys, self.auth_users)?;
        for (relation, n) in &self.rows {
            write!(f, ", {relation}={n}")?;
        }
        Ok(())
    }
}

/// r2d2 connection customizer that applies PRAGMA settings.
#[derive(Debug)]
struct ConnectionCustomizer {
    wal_mode: bool,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        if self.wal_mode {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }
        conn.execute_batch(
            "PRAGMA synchronous=NORMAL;
             PRAGMA temp_store=MEMORY;
             PRAGMA busy_timeout=5000;
             PRAGMA foreign_keys=ON;",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::init(&path, &DatabaseConfig::default()).unwrap();
        (db, dir)
    }

    #[test]
    fn test_database_init() {
        let (db, _dir) = test_db();
        let stats = db.stats().unwrap();
        assert_eq!(stats.stored_keys, 0);
        assert!(stats.rows.is_empty());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let (db, _dir) = test_db();
        let result: LcResult<()> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES ('k', 'v', 'now')",
                [],
            )
            .map_err(|e| LcError::Database(e.to_string()))?;
            Err(LcError::Internal("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.stats().unwrap().stored_keys, 0);
    }

    #[test]
    fn test_reset() {
        let (db, _dir) = test_db();
        db.conn()
            .unwrap()
            .execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES ('k', 'v', 'now')",
                [],
            )
            .unwrap();
        db.reset().unwrap();
        assert_eq!(db.stats().unwrap().stored_keys, 0);
    }
}
