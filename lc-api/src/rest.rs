//! Hosted backend over HTTP and websocket.
//!
//! Rows go through PostgREST at `/rest/v1`, auth through GoTrue at
//! `/auth/v1`, and change feeds through the realtime websocket. Every request
//! carries the project's anon key; after sign in the user's access token is
//! sent as the bearer instead. Requests are not retried.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use lc_core::config::BackendConfig;
use lc_core::error::{LcError, LcResult};
use lc_core::phone;
use lc_models::{AuthUser, Session};
use lc_socket::{ChannelSpec, RealtimeChannel, RealtimeClient};

use crate::backend::Backend;
use crate::query::{validate_identifier, Query};

/// HTTP + websocket client for a hosted backend project.
pub struct RestBackend {
    inner: Client,
    rest_root: String,
    auth_root: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    realtime: RealtimeClient,
}

impl RestBackend {
    /// Create a client from the `[backend]` configuration section.
    pub fn new(config: &BackendConfig) -> LcResult<Self> {
        if config.url.is_empty() || config.anon_key.is_empty() {
            return Err(LcError::MissingConfig("backend.url and backend.anon_key".into()));
        }
        let base = lc_core::AppConfig::sanitize_backend_url(&config.url);

        let inner = Client::builder()
            .timeout(Duration::from_millis(config.api_timeout_ms))
            .connect_timeout(Duration::from_secs(15))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| LcError::Http(format!("failed to build HTTP client: {e}")))?;

        let endpoint = RealtimeClient::endpoint_for(&base, &config.anon_key)?;

        Ok(Self {
            inner,
            rest_root: format!("{base}/rest/v1"),
            auth_root: format!("{base}/auth/v1"),
            anon_key: config.anon_key.clone(),
            session: RwLock::new(None),
            realtime: RealtimeClient::new(endpoint, Duration::from_secs(config.heartbeat_secs)),
        })
    }

    /// Base URL for row requests.
    pub fn rest_root(&self) -> &str {
        &self.rest_root
    }

    /// The realtime client, for connection state.
    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }

    /// Install a session obtained elsewhere (e.g. restored from disk).
    pub async fn restore_session(&self, session: Session) -> LcResult<()> {
        self.realtime
            .set_access_token(Some(session.access_token.clone()))
            .await?;
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn bearer(&self) -> String {
        match self.session.read().await.as_ref() {
            Some(s) if !s.is_expired() => s.access_token.clone(),
            _ => self.anon_key.clone(),
        }
    }

    async fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let bearer = self.bearer().await;
        self.inner
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    fn table_url(&self, table: &str) -> LcResult<String> {
        validate_identifier(table)?;
        Ok(format!("{}/{table}", self.rest_root))
    }

    async fn send(builder: RequestBuilder, what: &str) -> LcResult<Response> {
        debug!("backend request: {what}");
        let response = builder.send().await.map_err(classify_error)?;
        check_status(response).await
    }

    async fn json_body(response: Response) -> LcResult<Value> {
        response
            .json::<Value>()
            .await
            .map_err(|e| LcError::Serialization(format!("failed to parse backend response: {e}")))
    }

    fn rows(body: Value) -> LcResult<Vec<Value>> {
        match body {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }

    async fn set_session(&self, session: Option<Session>) -> LcResult<()> {
        let token = session.as_ref().map(|s| s.access_token.clone());
        *self.session.write().await = session;
        self.realtime.set_access_token(token).await
    }
}

#[async_trait]
impl Backend for RestBackend {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn select(&self, table: &str, query: &Query) -> LcResult<Vec<Value>> {
        query.validate()?;
        let url = self.table_url(table)?;
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(query.to_postgrest_params());

        let builder = self.request(Method::GET, &url).await.query(&params);
        let response = Self::send(builder, &format!("select {table}")).await?;
        Self::rows(Self::json_body(response).await?)
    }

    async fn insert(&self, table: &str, row: Value) -> LcResult<Value> {
        let url = self.table_url(table)?;
        let builder = self
            .request(Method::POST, &url)
            .await
            .header("Prefer", "return=representation")
            .json(&row);
        let response = Self::send(builder, &format!("insert {table}")).await?;
        Self::rows(Self::json_body(response).await?)?
            .into_iter()
            .next()
            .ok_or_else(|| LcError::backend(format!("insert into {table} returned no row")))
    }

    async fn update(&self, table: &str, query: &Query, patch: Value) -> LcResult<Vec<Value>> {
        query.validate()?;
        let url = self.table_url(table)?;
        let builder = self
            .request(Method::PATCH, &url)
            .await
            .header("Prefer", "return=representation")
            .query(&query.to_postgrest_params())
            .json(&patch);
        let response = Self::send(builder, &format!("update {table}")).await?;
        Self::rows(Self::json_body(response).await?)
    }

    async fn delete(&self, table: &str, query: &Query) -> LcResult<u64> {
        query.validate()?;
        let url = self.table_url(table)?;
        let builder = self
            .request(Method::DELETE, &url)
            .await
            .header("Prefer", "return=representation")
            .query(&query.to_postgrest_params());
        let response = Self::send(builder, &format!("delete {table}")).await?;
        Ok(Self::rows(Self::json_body(response).await?)?.len() as u64)
    }

    async fn subscribe(&self, spec: ChannelSpec) -> LcResult<RealtimeChannel> {
        self.realtime.subscribe(spec).await
    }

    async fn unsubscribe(&self, topic: &str) -> LcResult<bool> {
        self.realtime.unsubscribe(topic).await
    }

    async fn sign_up(&self, phone: &str, password: &str) -> LcResult<AuthUser> {
        let url = format!("{}/signup", self.auth_root);
        let builder = self
            .request(Method::POST, &url)
            .await
            .json(&json!({ "phone": phone, "password": password }));
        let body = Self::json_body(Self::send(builder, "sign up").await?).await?;

        // Auto-confirmed projects answer with a session, others with the bare user.
        let session = parse_session(&body);
        let user = body.get("user").unwrap_or(&body);
        let id = user
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LcError::AuthFailed("sign up response has no user id".into()))?
            .to_string();

        if let Some(s) = &session {
            self.set_session(Some(s.clone())).await?;
        }
        info!(phone = %phone::redact(phone), "auth identity created");
        Ok(AuthUser {
            id,
            phone: phone.to_string(),
            session,
        })
    }

    async fn sign_in_with_password(&self, phone: &str, password: &str) -> LcResult<Session> {
        let url = format!("{}/token?grant_type=password", self.auth_root);
        let builder = self
            .request(Method::POST, &url)
            .await
            .json(&json!({ "phone": phone, "password": password }));
        let body = Self::json_body(Self::send(builder, "sign in").await?).await?;
        let session = parse_session(&body)
            .ok_or_else(|| LcError::AuthFailed("sign in response has no session".into()))?;
        self.set_session(Some(session.clone())).await?;
        Ok(session)
    }

    async fn sign_out(&self) -> LcResult<()> {
        let has_session = self.session.read().await.is_some();
        if has_session {
            let url = format!("{}/logout", self.auth_root);
            let builder = self.request(Method::POST, &url).await;
            Self::send(builder, "sign out").await?;
        }
        self.set_session(None).await
    }

    async fn get_session(&self) -> LcResult<Option<Session>> {
        Ok(self
            .session
            .read()
            .await
            .clone()
            .filter(|s| !s.is_expired()))
    }
}

/// Read a GoTrue token response.
fn parse_session(body: &Value) -> Option<Session> {
    let access_token = body.get("access_token")?.as_str()?.to_string();
    let user = body.get("user")?;
    let expires_at = body
        .get("expires_in")
        .and_then(|v| v.as_i64())
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
    Some(Session {
        access_token,
        user_id: user.get("id")?.as_str()?.to_string(),
        phone: user
            .get("phone")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        expires_at,
    })
}

/// Convert non-success statuses into errors, keeping the backend's message.
async fn check_status(response: Response) -> LcResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| status.to_string());

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || (status == StatusCode::BAD_REQUEST && body.contains("invalid_grant"))
    {
        return Err(LcError::AuthFailed(message));
    }
    Err(LcError::Backend {
        status: status.as_u16(),
        message,
    })
}

/// Pull the human-readable message out of a PostgREST or GoTrue error body.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(String::from)
}

fn classify_error(e: reqwest::Error) -> LcError {
    if e.is_timeout() {
        LcError::Http(format!("request timed out: {e}"))
    } else if e.is_connect() {
        LcError::Http(format!("connection failed: {e}"))
    } else {
        LcError::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackendConfig {
        BackendConfig {
            url: "abcd.supabase.co/".into(),
            anon_key: "anon".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_roots() {
        let backend = RestBackend::new(&config()).unwrap();
        assert_eq!(backend.rest_root(), "https://abcd.supabase.co/rest/v1");
        assert_eq!(backend.auth_root, "https://abcd.supabase.co/auth/v1");
    }

    #[test]
    fn test_missing_config() {
        let err = RestBackend::new(&BackendConfig::default()).err().unwrap();
        assert!(matches!(err, LcError::MissingConfig(_)));
    }

    #[test]
    fn test_table_url_rejects_bad_names() {
        let backend = RestBackend::new(&config()).unwrap();
        assert!(backend.table_url("messages").is_ok());
        assert!(backend.table_url("messages?select=*").is_err());
    }

    #[test]
    fn test_parse_session() {
        let body = json!({
            "access_token": "jwt",
            "expires_in": 3600,
            "user": {"id": "u1", "phone": "573001234567"}
        });
        let session = parse_session(&body).unwrap();
        assert_eq!(session.user_id, "u1");
        assert!(!session.is_expired());
        assert!(parse_session(&json!({"id": "u1"})).is_none());
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(r#"{"code":"23505","message":"duplicate key"}"#).as_deref(),
            Some("duplicate key")
        );
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#)
                .as_deref(),
            Some("Invalid login credentials")
        );
        assert!(error_message("<html>").is_none());
    }

    #[tokio::test]
    async fn test_bearer_falls_back_to_anon_key() {
        let backend = RestBackend::new(&config()).unwrap();
        assert_eq!(backend.bearer().await, "anon");

        *backend.session.write().await = Some(Session {
            access_token: "jwt".into(),
            user_id: "u1".into(),
            phone: String::new(),
            expires_at: None,
        });
        assert_eq!(backend.bearer().await, "jwt");
    }
}
