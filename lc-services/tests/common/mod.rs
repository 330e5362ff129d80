//! Shared test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

use lc_api::{Backend, ConsoleGateway, LocalBackend, Query, SharedBackend};
use lc_core::config::{AppConfig, ConfigHandle, DatabaseConfig, StatusPolicy};
use lc_core::constants::tables;
use lc_core::error::{LcError, LcResult};
use lc_models::{AuthUser, Database, Message, Session};
use lc_services::{
    EventBus, ListenerHandle, MessagingService, RecordingNotifier, ServiceRegistry,
};
use lc_socket::{ChannelSpec, RealtimeChannel};

/// Create a temporary database with full schema and migrations applied.
/// Returns the Database and the TempDir (must be held alive for the duration of the test).
pub fn create_test_db() -> (Database, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("test.db");
    let config = DatabaseConfig::default();
    let db = Database::init(&path, &config).expect("failed to init test database");
    (db, dir)
}

/// An in-process backend on a fresh database.
pub fn create_local_backend() -> (Arc<LocalBackend>, Database, TempDir) {
    let (db, dir) = create_test_db();
    (Arc::new(LocalBackend::new(db.clone())), db, dir)
}

/// Create an EventBus with a small buffer suitable for tests.
pub fn create_test_event_bus() -> EventBus {
    EventBus::new(64)
}

/// A messaging service on its own local backend.
pub fn create_messaging(policy: StatusPolicy) -> (MessagingService, Arc<LocalBackend>, TempDir) {
    let (backend, _db, dir) = create_local_backend();
    let svc = MessagingService::new(backend.clone(), create_test_event_bus(), policy);
    (svc, backend, dir)
}

/// A full registry on a local backend with the console SMS gateway.
pub async fn create_test_registry(config: AppConfig) -> (ServiceRegistry, Arc<RecordingNotifier>, TempDir) {
    let (backend, db, dir) = create_local_backend();
    let notifier = Arc::new(RecordingNotifier::new());
    let registry = ServiceRegistry::new(
        ConfigHandle::new(config),
        db,
        backend,
        Arc::new(ConsoleGateway),
        notifier.clone(),
    )
    .await;
    (registry, notifier, dir)
}

/// Insert a `users` row directly.
pub async fn seed_user(backend: &dyn Backend, id: &str, name: &str, phone: &str) {
    backend
        .insert(tables::USERS, json!({"id": id, "name": name, "phone": phone}))
        .await
        .expect("failed to seed user");
}

/// Register a listener that forwards every delivered message to a channel.
pub fn collect_messages(svc: &MessagingService) -> (ListenerHandle, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = svc.on_message(move |message: &Message| {
        tx.send(message.clone())
            .map_err(|e| LcError::Internal(e.to_string()))
    });
    (handle, rx)
}

/// Wait briefly for the next collected message.
pub async fn next_message(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<Message> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Give delivery tasks a moment to drain, then report whether anything arrived.
pub async fn nothing_arrives(rx: &mut mpsc::UnboundedReceiver<Message>) -> bool {
    tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .is_err()
}

/// Backend that delegates to a local backend but refuses participant writes.
pub struct ParticipantsDown {
    pub inner: Arc<LocalBackend>,
}

#[async_trait]
impl Backend for ParticipantsDown {
    fn name(&self) -> &'static str {
        "participants-down"
    }

    async fn select(&self, table: &str, query: &Query) -> LcResult<Vec<Value>> {
        self.inner.select(table, query).await
    }

    async fn insert(&self, table: &str, row: Value) -> LcResult<Value> {
        if table == tables::CHAT_PARTICIPANTS {
            return Err(LcError::Backend {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        self.inner.insert(table, row).await
    }

    async fn update(&self, table: &str, query: &Query, patch: Value) -> LcResult<Vec<Value>> {
        self.inner.update(table, query, patch).await
    }

    async fn delete(&self, table: &str, query: &Query) -> LcResult<u64> {
        self.inner.delete(table, query).await
    }

    async fn subscribe(&self, spec: ChannelSpec) -> LcResult<RealtimeChannel> {
        self.inner.subscribe(spec).await
    }

    async fn unsubscribe(&self, topic: &str) -> LcResult<bool> {
        self.inner.unsubscribe(topic).await
    }

    async fn sign_up(&self, phone: &str, password: &str) -> LcResult<AuthUser> {
        self.inner.sign_up(phone, password).await
    }

    async fn sign_in_with_password(&self, phone: &str, password: &str) -> LcResult<Session> {
        self.inner.sign_in_with_password(phone, password).await
    }

    async fn sign_out(&self) -> LcResult<()> {
        self.inner.sign_out().await
    }

    async fn get_session(&self) -> LcResult<Option<Session>> {
        self.inner.get_session().await
    }
}

/// Wrap a local backend so participant writes fail.
pub fn participants_down(inner: Arc<LocalBackend>) -> SharedBackend {
    Arc::new(ParticipantsDown { inner })
}

/// Backend that caps every select at `row_cap` rows, the way a hosted
/// project's max-rows setting does, and optionally fails channel teardown.
pub struct Constrained {
    pub inner: Arc<LocalBackend>,
    pub row_cap: usize,
    pub unsubscribe_fails: bool,
}

#[async_trait]
impl Backend for Constrained {
    fn name(&self) -> &'static str {
        "constrained"
    }

    async fn select(&self, table: &str, query: &Query) -> LcResult<Vec<Value>> {
        let mut rows = self.inner.select(table, query).await?;
        rows.truncate(self.row_cap);
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> LcResult<Value> {
        self.inner.insert(table, row).await
    }

    async fn update(&self, table: &str, query: &Query, patch: Value) -> LcResult<Vec<Value>> {
        self.inner.update(table, query, patch).await
    }

    async fn delete(&self, table: &str, query: &Query) -> LcResult<u64> {
        self.inner.delete(table, query).await
    }

    async fn subscribe(&self, spec: ChannelSpec) -> LcResult<RealtimeChannel> {
        self.inner.subscribe(spec).await
    }

    async fn unsubscribe(&self, topic: &str) -> LcResult<bool> {
        if self.unsubscribe_fails {
            return Err(LcError::Realtime(format!("could not leave {topic}")));
        }
        self.inner.unsubscribe(topic).await
    }

    async fn sign_up(&self, phone: &str, password: &str) -> LcResult<AuthUser> {
        self.inner.sign_up(phone, password).await
    }

    async fn sign_in_with_password(&self, phone: &str, password: &str) -> LcResult<Session> {
        self.inner.sign_in_with_password(phone, password).await
    }

    async fn sign_out(&self) -> LcResult<()> {
        self.inner.sign_out().await
    }

    async fn get_session(&self) -> LcResult<Option<Session>> {
        self.inner.get_session().await
    }
}

/// Wrap a local backend so selects return at most `row_cap` rows.
pub fn row_capped(inner: Arc<LocalBackend>, row_cap: usize) -> SharedBackend {
    Arc::new(Constrained { inner, row_cap, unsubscribe_fails: false })
}

/// Wrap a local backend so leaving a channel always fails.
pub fn unsubscribe_down(inner: Arc<LocalBackend>) -> SharedBackend {
    Arc::new(Constrained { inner, row_cap: usize::MAX, unsubscribe_fails: true })
}
