//! The backend seam used by every service.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use lc_core::error::LcResult;
use lc_models::{AuthUser, Session};
use lc_socket::{ChannelSpec, RealtimeChannel};

use crate::query::Query;

/// Shared handle to the backend, created once at the application root.
pub type SharedBackend = Arc<dyn Backend>;

/// Row storage, realtime change feeds, and auth of a backend-as-a-service.
///
/// Rows are JSON objects. On insert the backend assigns `id` and
/// `created_at` when the caller leaves them out. No method retries.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs and the CLI.
    fn name(&self) -> &'static str;

    /// Rows of `table` matching `query`.
    async fn select(&self, table: &str, query: &Query) -> LcResult<Vec<Value>>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: &str, row: Value) -> LcResult<Value>;

    /// Merge `patch` into every matching row and return the updated rows.
    async fn update(&self, table: &str, query: &Query, patch: Value) -> LcResult<Vec<Value>>;

    /// Delete matching rows and return how many were removed.
    async fn delete(&self, table: &str, query: &Query) -> LcResult<u64>;

    /// Open a change feed channel.
    async fn subscribe(&self, spec: ChannelSpec) -> LcResult<RealtimeChannel>;

    /// Close a channel by topic. Returns whether it was open.
    async fn unsubscribe(&self, topic: &str) -> LcResult<bool>;

    /// Create an auth identity with phone and password.
    async fn sign_up(&self, phone: &str, password: &str) -> LcResult<AuthUser>;

    /// Start a session with phone and password.
    async fn sign_in_with_password(&self, phone: &str, password: &str) -> LcResult<Session>;

    /// End the current session.
    async fn sign_out(&self) -> LcResult<()>;

    /// The current session, if any.
    async fn get_session(&self) -> LcResult<Option<Session>>;

    /// First matching row.
    async fn select_one(&self, table: &str, query: &Query) -> LcResult<Option<Value>> {
        let limited = query.clone().limit(1);
        Ok(self.select(table, &limited).await?.into_iter().next())
    }
}
