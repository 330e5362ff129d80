//! In-process backend on the local SQLite database.
//!
//! Rows of every relation live as JSON documents in `backend_rows`. Writes are
//! published to open channels through a `ChannelRouter`, so realtime behaves
//! like the hosted service within one process. Auth identities are stored in
//! `auth_users` with salted SHA-256 password hashes, and the current session
//! survives restarts in `auth_session`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rand::RngCore;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use lc_core::error::{LcError, LcResult};
use lc_core::phone;
use lc_models::{AuthUser, Database, Session};
use lc_socket::{ChangeEvent, ChangeKind, ChannelRouter, ChannelSpec, RealtimeChannel};

use crate::backend::Backend;
use crate::query::{validate_identifier, Filter, Query};

/// Backend implementation over the local database.
#[derive(Clone)]
pub struct LocalBackend {
    db: Database,
    router: Arc<ChannelRouter>,
}

impl LocalBackend {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            router: Arc::new(ChannelRouter::new()),
        }
    }

    /// Number of open realtime channels.
    pub fn open_channel_count(&self) -> usize {
        self.router.len()
    }

    /// Topics of open realtime channels.
    pub fn open_topics(&self) -> Vec<String> {
        self.router.topics()
    }

    fn publish(&self, event: ChangeEvent) {
        let delivered = self.router.route(&event);
        if delivered > 0 {
            debug!("{} on {} delivered to {delivered} channel(s)", event.kind.as_str(), event.table);
        }
    }
}

/// Timestamps sort lexically in insertion order at microsecond precision.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn db_err(e: rusqlite::Error) -> LcError {
    LcError::Database(e.to_string())
}

fn json_path(column: &str) -> String {
    format!("json_extract(data, '$.{column}')")
}

/// Build the WHERE/ORDER/LIMIT tail and its parameters.
///
/// Column names must already be validated.
fn build_clauses(query: &Query) -> (String, Vec<String>) {
    let mut sql = String::new();
    let mut args = Vec::new();

    for filter in &query.filters {
        match filter {
            Filter::Eq(column, value) => {
                sql.push_str(&format!(" AND {} = ?", json_path(column)));
                args.push(value.clone());
            }
            Filter::ILike(column, pattern) => {
                // ASCII LIKE in SQLite is already case-insensitive
                sql.push_str(&format!(" AND {} LIKE ?", json_path(column)));
                args.push(pattern.clone());
            }
            Filter::In(_, values) if values.is_empty() => sql.push_str(" AND 0"),
            Filter::In(column, values) => {
                let marks = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!(" AND {} IN ({marks})", json_path(column)));
                args.extend(values.iter().cloned());
            }
        }
    }

    match &query.order {
        Some(order) => {
            let dir = if order.ascending { "ASC" } else { "DESC" };
            sql.push_str(&format!(" ORDER BY {} {dir}, seq {dir}", json_path(&order.column)));
        }
        None => sql.push_str(" ORDER BY seq ASC"),
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    (sql, args)
}

/// Rows of `table` matching `query`, with their sequence numbers.
fn matching_rows(conn: &Connection, table: &str, query: &Query) -> LcResult<Vec<(i64, Value)>> {
    validate_identifier(table)?;
    query.validate()?;

    let (tail, mut args) = build_clauses(query);
    let sql = format!("SELECT seq, data FROM backend_rows WHERE relation = ?{tail}");
    args.insert(0, table.to_string());

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(db_err)?;

    let mut out = Vec::new();
    for row in rows {
        let (seq, data) = row.map_err(db_err)?;
        out.push((seq, serde_json::from_str(&data)?));
    }
    Ok(out)
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn new_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn store_session(conn: &Connection, session: &Session) -> LcResult<()> {
    conn.execute(
        "INSERT INTO auth_session (slot, access_token, user_id, expires_at) VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(slot) DO UPDATE SET access_token = excluded.access_token,
             user_id = excluded.user_id, expires_at = excluded.expires_at",
        params![
            session.access_token,
            session.user_id,
            session.expires_at.map(|t| t.to_rfc3339())
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn new_session(user_id: &str, phone: &str) -> Session {
    Session {
        access_token: uuid::Uuid::new_v4().simple().to_string(),
        user_id: user_id.to_string(),
        phone: phone.to_string(),
        expires_at: None,
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn select(&self, table: &str, query: &Query) -> LcResult<Vec<Value>> {
        let conn = self.db.conn()?;
        Ok(matching_rows(&conn, table, query)?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    async fn insert(&self, table: &str, row: Value) -> LcResult<Value> {
        validate_identifier(table)?;
        let Value::Object(mut fields) = row else {
            return Err(LcError::backend(format!("insert into {table}: row must be an object")));
        };

        let id = match fields.get("id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let created_at = match fields.get("created_at").and_then(|v| v.as_str()) {
            Some(ts) => ts.to_string(),
            None => now_timestamp(),
        };
        fields.insert("id".into(), Value::String(id.clone()));
        fields.insert("created_at".into(), Value::String(created_at.clone()));
        let stored = Value::Object(fields);

        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO backend_rows (relation, id, data, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![table, id, stored.to_string(), created_at],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation => {
                LcError::Backend {
                    status: 409,
                    message: format!("duplicate id {id} in {table}"),
                }
            }
            other => db_err(other),
        })?;
        drop(conn);

        self.publish(ChangeEvent::insert(table, stored.clone()));
        Ok(stored)
    }

    async fn update(&self, table: &str, query: &Query, patch: Value) -> LcResult<Vec<Value>> {
        let Value::Object(patch) = patch else {
            return Err(LcError::backend(format!("update {table}: patch must be an object")));
        };

        let changes = self.db.transaction(|conn| {
            let mut changes = Vec::new();
            for (seq, old) in matching_rows(conn, table, query)? {
                let mut fields: Map<String, Value> = old.as_object().cloned().unwrap_or_default();
                for (k, v) in &patch {
                    // id and created_at are owned by the backend
                    if k != "id" && k != "created_at" {
                        fields.insert(k.clone(), v.clone());
                    }
                }
                let new = Value::Object(fields);
                conn.execute(
                    "UPDATE backend_rows SET data = ?1 WHERE seq = ?2",
                    params![new.to_string(), seq],
                )
                .map_err(db_err)?;
                changes.push((old, new));
            }
            Ok(changes)
        })?;

        let mut updated = Vec::with_capacity(changes.len());
        for (old, new) in changes {
            self.publish(ChangeEvent::update(table, new.clone(), Some(old)));
            updated.push(new);
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, query: &Query) -> LcResult<u64> {
        let removed = self.db.transaction(|conn| {
            let rows = matching_rows(conn, table, query)?;
            for (seq, _) in &rows {
                conn.execute("DELETE FROM backend_rows WHERE seq = ?1", [seq])
                    .map_err(db_err)?;
            }
            Ok(rows)
        })?;

        let count = removed.len() as u64;
        for (_, old) in removed {
            self.publish(ChangeEvent {
                kind: ChangeKind::Delete,
                schema: "public".into(),
                table: table.to_string(),
                record: Value::Object(Map::new()),
                old_record: Some(old),
            });
        }
        Ok(count)
    }

    async fn subscribe(&self, spec: ChannelSpec) -> LcResult<RealtimeChannel> {
        validate_identifier(&spec.table)?;
        debug!("local channel {} opened", spec.topic);
        Ok(self.router.open(spec))
    }

    async fn unsubscribe(&self, topic: &str) -> LcResult<bool> {
        Ok(self.router.close(topic))
    }

    async fn sign_up(&self, phone: &str, password: &str) -> LcResult<AuthUser> {
        let id = uuid::Uuid::new_v4().to_string();
        let salt = new_salt();
        let hash = hash_password(&salt, password);
        let session = new_session(&id, phone);

        self.db.transaction(|conn| {
            conn.execute(
                "INSERT INTO auth_users (id, phone, password_salt, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, phone, salt, hash, now_timestamp()],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation => {
                    LcError::AuthFailed("user already registered".into())
                }
                other => db_err(other),
            })?;
            store_session(conn, &session)
        })?;

        info!(phone = %phone::redact(phone), "local auth identity created");
        Ok(AuthUser {
            id,
            phone: phone.to_string(),
            session: Some(session),
        })
    }

    async fn sign_in_with_password(&self, phone: &str, password: &str) -> LcResult<Session> {
        let conn = self.db.conn()?;
        let found = conn.query_row(
            "SELECT id, password_salt, password_hash FROM auth_users WHERE phone = ?1",
            [phone],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
        );
        let (id, salt, hash) = match found {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(LcError::AuthFailed("invalid login credentials".into()))
            }
            Err(e) => return Err(db_err(e)),
        };
        if hash_password(&salt, password) != hash {
            return Err(LcError::AuthFailed("invalid login credentials".into()));
        }

        let session = new_session(&id, phone);
        store_session(&conn, &session)?;
        Ok(session)
    }

    async fn sign_out(&self) -> LcResult<()> {
        let conn = self.db.conn()?;
        conn.execute("DELETE FROM auth_session", []).map_err(db_err)?;
        Ok(())
    }

    async fn get_session(&self) -> LcResult<Option<Session>> {
        let conn = self.db.conn()?;
        let found = conn.query_row(
            "SELECT s.access_token, s.user_id, u.phone, s.expires_at
             FROM auth_session s JOIN auth_users u ON u.id = s.user_id
             WHERE s.slot = 1",
            [],
            |row| {
                Ok(Session {
                    access_token: row.get(0)?,
                    user_id: row.get(1)?,
                    phone: row.get(2)?,
                    expires_at: row
                        .get::<_, Option<String>>(3)?
                        .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                        .map(|t| t.with_timezone(&Utc)),
                })
            },
        );
        match found {
            Ok(session) if !session.is_expired() => Ok(Some(session)),
            Ok(_) | Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_core::config::DatabaseConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn backend() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::init(&dir.path().join("local.db"), &DatabaseConfig::default()).unwrap();
        (LocalBackend::new(db), dir)
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_timestamp() {
        let (backend, _dir) = backend();
        let row = backend
            .insert("messages", json!({"chat_id": "c1", "content": "hi"}))
            .await
            .unwrap();
        assert!(row["id"].as_str().is_some_and(|s| !s.is_empty()));
        assert!(row["created_at"].as_str().is_some());

        let fetched = backend
            .select("messages", &Query::new().eq("chat_id", "c1"))
            .await
            .unwrap();
        assert_eq!(fetched, vec![row]);
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let (backend, _dir) = backend();
        backend.insert("chats", json!({"id": "c1"})).await.unwrap();
        let err = backend.insert("chats", json!({"id": "c1"})).await.unwrap_err();
        assert!(matches!(err, LcError::Backend { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_filters_order_and_limit() {
        let (backend, _dir) = backend();
        for (id, phone) in [("u1", "+573001110000"), ("u2", "+573002220000"), ("u3", "+5215512345678")] {
            backend.insert("users", json!({"id": id, "phone": phone})).await.unwrap();
        }

        let hits = backend
            .select("users", &Query::new().ilike("phone", "%300%").order_by("id", false))
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["u2", "u1"]);

        let limited = backend
            .select("users", &Query::new().is_in("id", ["u1", "u3"]).limit(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let none = backend
            .select("users", &Query::new().is_in("id", Vec::<String>::new()))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (backend, _dir) = backend();
        let row = backend
            .insert("messages", json!({"chat_id": "c1", "status": "sent"}))
            .await
            .unwrap();
        let id = row["id"].as_str().unwrap().to_string();

        let updated = backend
            .update("messages", &Query::new().eq("id", &id), json!({"status": "read", "id": "hijack"}))
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["status"], "read");
        assert_eq!(updated[0]["id"], id.as_str());

        assert_eq!(backend.delete("messages", &Query::new().eq("id", &id)).await.unwrap(), 1);
        assert_eq!(backend.delete("messages", &Query::new().eq("id", &id)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_publishes_to_matching_channel() {
        let (backend, _dir) = backend();
        let spec = ChannelSpec::new("chat:c1", "messages")
            .on(ChangeKind::Insert)
            .filter_eq("chat_id", "c1");
        let mut channel = backend.subscribe(spec).await.unwrap();
        assert_eq!(backend.open_channel_count(), 1);

        backend.insert("messages", json!({"chat_id": "c2", "content": "other"})).await.unwrap();
        backend.insert("messages", json!({"chat_id": "c1", "content": "mine"})).await.unwrap();

        let event = channel.recv().await.unwrap();
        assert_eq!(event.record["content"], "mine");

        assert!(backend.unsubscribe("chat:c1").await.unwrap());
        assert!(channel.recv().await.is_none());
        assert_eq!(backend.open_channel_count(), 0);
    }

    #[tokio::test]
    async fn test_auth_flow() {
        let (backend, _dir) = backend();
        let user = backend.sign_up("+573001234567", "123456").await.unwrap();
        assert!(user.session.is_some());
        assert_eq!(backend.get_session().await.unwrap().unwrap().user_id, user.id);

        backend.sign_out().await.unwrap();
        assert!(backend.get_session().await.unwrap().is_none());

        let err = backend.sign_in_with_password("+573001234567", "wrong").await.unwrap_err();
        assert!(matches!(err, LcError::AuthFailed(_)));

        let session = backend.sign_in_with_password("+573001234567", "123456").await.unwrap();
        assert_eq!(session.user_id, user.id);

        let dup = backend.sign_up("+573001234567", "x").await.unwrap_err();
        assert!(matches!(dup, LcError::AuthFailed(_)));
    }

    #[test]
    fn test_password_hash_is_salted() {
        assert_ne!(hash_password("a", "pw"), hash_password("b", "pw"));
        assert_eq!(hash_password("a", "pw").len(), 64);
    }
}
