//! CLI command implementations.

pub mod auth;
pub mod chats;
pub mod config;
pub mod contacts;
pub mod db;
pub mod messages;

use std::sync::Arc;

use tracing::{info, warn};

use lc_api::{
    gateway_from_config, Backend, ConsoleGateway, LocalBackend, RestBackend, SharedBackend, SmsGateway,
};
use lc_core::config::{AppConfig, ConfigHandle};
use lc_core::constants::store_keys;
use lc_core::error::{ErrorCategory, LcError, LcResult};
use lc_models::{Database, LocalStore, Session, User};
use lc_services::{DesktopNotifier, ServiceRegistry};

/// Everything a command needs once the services are running.
pub struct AppContext {
    pub registry: ServiceRegistry,
    pub store: LocalStore,
    /// Set when talking to the hosted backend.
    rest: Option<Arc<RestBackend>>,
}

impl AppContext {
    /// Save the backend session so the next invocation starts signed in.
    pub async fn persist_session(&self) -> LcResult<()> {
        match self.registry.backend.get_session().await? {
            Some(session) => self.store.set(store_keys::AUTH_SESSION, &session),
            None => self.store.remove(store_keys::AUTH_SESSION).map(|_| ()),
        }
    }

    /// The signed-in user, or `NotSignedIn`.
    pub async fn current_user(&self) -> LcResult<User> {
        self.registry.identity.require_user().await
    }

    /// Whether the hosted backend is in use.
    pub fn is_online(&self) -> bool {
        self.rest.is_some()
    }

    /// Stop every service, then close the realtime socket.
    pub async fn shutdown(self) -> LcResult<()> {
        self.registry.shutdown_all().await?;
        if let Some(rest) = &self.rest {
            info!(state = ?rest.realtime().state(), "closing realtime connection");
            rest.realtime().disconnect().await;
        }
        Ok(())
    }
}

/// Helper to initialize the database from config.
pub fn init_database(config: &AppConfig) -> LcResult<Database> {
    let db_path = config.effective_db_path()?;
    Database::init(&db_path, &config.database)
}

/// Open the database, pick a backend, and initialize every service.
pub async fn build_context(config: AppConfig, offline: bool) -> LcResult<AppContext> {
    let database = init_database(&config)?;
    let store = LocalStore::new(database.clone());

    let (backend, sms, rest): (SharedBackend, Arc<dyn SmsGateway>, _) = if offline {
        info!("using local backend at {}", config.effective_db_path()?.display());
        let backend: SharedBackend = Arc::new(LocalBackend::new(database.clone()));
        let sms: Arc<dyn SmsGateway> = Arc::new(ConsoleGateway);
        (backend, sms, None)
    } else {
        if !config.is_backend_configured() {
            return Err(LcError::MissingConfig(
                "backend.url and backend.anon_key (or run with --offline)".into(),
            ));
        }
        let rest = Arc::new(RestBackend::new(&config.backend)?);
        if let Some(session) = store.get::<Session>(store_keys::AUTH_SESSION)? {
            if session.is_expired() {
                warn!("stored session expired, sign in again");
            } else {
                rest.restore_session(session).await?;
            }
        }
        let backend: SharedBackend = rest.clone();
        (backend, gateway_from_config(&config.sms)?, Some(rest))
    };

    let registry = ServiceRegistry::new(
        ConfigHandle::new(config),
        database,
        backend,
        sms,
        Arc::new(DesktopNotifier),
    )
    .await;
    if let Err(e) = registry.init_all().await {
        if e.category() != ErrorCategory::Permission {
            return Err(e);
        }
        warn!("continuing without desktop notifications: {e}");
    }

    Ok(AppContext { registry, store, rest })
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Truncate a string to a maximum number of characters, appending an
/// ellipsis if truncated.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else if max_chars > 3 {
        let head: String = s.chars().take(max_chars - 3).collect();
        format!("{head}...")
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Short local timestamp for tables.
pub fn short_time(at: &chrono::DateTime<chrono::Utc>) -> String {
    at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("hola", 10), "hola");
        assert_eq!(truncate("¿Almorzamos hoy?", 8), "¿Almo...");
        assert_eq!(truncate("ñandú", 2), "ña");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(5120), "5.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
