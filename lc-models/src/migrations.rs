//! Versioned database migrations.
//!
//! Migrations run sequentially from the stored version to
//! `DB_SCHEMA_VERSION`. Each one is safe to re-run.

use rusqlite::Connection;
use tracing::{info, warn};
use lc_core::constants::DB_SCHEMA_VERSION;
use lc_core::error::{LcError, LcResult};

/// Run all pending migrations on the database.
pub fn run_migrations(conn: &Connection) -> LcResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version >= DB_SCHEMA_VERSION {
        return Ok(());
    }

    info!("running migrations from version {current_version} to {DB_SCHEMA_VERSION}");
    for version in (current_version + 1)..=DB_SCHEMA_VERSION {
        run_migration(conn, version)?;
    }

    set_schema_version(conn, DB_SCHEMA_VERSION)?;
    info!("migrations complete, schema at version {DB_SCHEMA_VERSION}");
    Ok(())
}

/// Get the current schema version, recording 0 on first run.
pub fn get_schema_version(conn: &Connection) -> LcResult<i32> {
    let stored: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .map_err(|e| LcError::Database(e.to_string()))?;

    match stored {
        Some(v) => Ok(v),
        None => {
            conn.execute("INSERT INTO schema_version (version) VALUES (0)", [])
                .map_err(|e| LcError::Database(e.to_string()))?;
            Ok(0)
        }
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> LcResult<()> {
    conn.execute("UPDATE schema_version SET version = ?1", [version])
        .map_err(|e| LcError::Database(e.to_string()))?;
    Ok(())
}

fn run_migration(conn: &Connection, version: i32) -> LcResult<()> {
    info!("applying migration version {version}");

    let sql = match version {
        // v1 is the base schema from schema::create_tables
        1 => return Ok(()),
        2 => MIGRATION_V2,
        _ => {
            warn!("unknown migration version {version}, skipping");
            return Ok(());
        }
    };

    conn.execute_batch(sql)
        .map_err(|e| LcError::Migration(format!("v{version}: {e}")))
}

/// v2: expression indexes for the two hot lookups, messages by chat and
/// participants by user.
const MIGRATION_V2: &str = r#"
CREATE INDEX IF NOT EXISTS idx_backend_rows_chat
    ON backend_rows(relation, json_extract(data, '$.chat_id'));
CREATE INDEX IF NOT EXISTS idx_backend_rows_user
    ON backend_rows(relation, json_extract(data, '$.user_id'));
"#;
