//! Application configuration management.
//!
//! Handles loading, saving, and accessing the client configuration: backend
//! project credentials, SMS provider, local storage, and behaviour policies.
//! Configuration is persisted as TOML on disk; secrets may instead come from
//! the environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{LcError, LcResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend project connection settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// SMS provider settings.
    #[serde(default)]
    pub sms: SmsConfig,

    /// Local database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Phone verification settings.
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Messaging behaviour.
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Contact search settings.
    #[serde(default)]
    pub contacts: ContactsConfig,

    /// Notification settings.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Backend project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project URL, e.g. "https://abcd.supabase.co".
    #[serde(default)]
    pub url: String,

    /// Public anonymous API key sent with every request.
    #[serde(default)]
    pub anon_key: String,

    /// API request timeout in milliseconds.
    #[serde(default = "default_api_timeout")]
    pub api_timeout_ms: u64,

    /// Realtime heartbeat interval in seconds.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

/// Which SMS gateway delivers verification codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmsProvider {
    /// Twilio Programmable Messaging.
    Twilio,
    /// Log the code instead of sending it. Development only.
    Console,
}

/// SMS provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    /// Gateway selection.
    #[serde(default = "default_sms_provider")]
    pub provider: SmsProvider,

    /// Twilio account SID.
    #[serde(default)]
    pub account_sid: String,

    /// Twilio auth token.
    #[serde(default)]
    pub auth_token: String,

    /// Sender number.
    #[serde(default = "default_from_number")]
    pub from_number: String,

    /// Twilio API base URL. Overridable for testing.
    #[serde(default = "default_twilio_base")]
    pub api_base: String,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. If empty, uses default location.
    #[serde(default)]
    pub path: String,

    /// Enable WAL (Write-Ahead Logging) mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Run integrity check on startup.
    #[serde(default = "default_true")]
    pub integrity_check_on_startup: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

/// Phone verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Seconds a verification code stays valid.
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: u64,
}

/// How message status updates are validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPolicy {
    /// Any status may replace any other, including regressions.
    #[default]
    Arbitrary,
    /// Status may only move forward: sent, delivered, read.
    Monotonic,
}

/// Messaging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Validation applied by status updates.
    #[serde(default)]
    pub status_policy: StatusPolicy,
}

/// Contacts configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactsConfig {
    /// Maximum results returned by phone search.
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,
}

/// Notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Show desktop notifications for incoming messages.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Include message text in the notification body.
    #[serde(default = "default_true")]
    pub show_preview: bool,
}

// Default value functions for serde

fn default_api_timeout() -> u64 {
    constants::DEFAULT_API_TIMEOUT_MS
}

fn default_heartbeat() -> u64 {
    constants::REALTIME_HEARTBEAT_SECS
}

fn default_sms_provider() -> SmsProvider {
    SmsProvider::Twilio
}

fn default_from_number() -> String {
    constants::TWILIO_TEST_FROM_NUMBER.to_string()
}

fn default_twilio_base() -> String {
    constants::TWILIO_API_BASE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_code_ttl() -> u64 {
    constants::VERIFICATION_CODE_TTL_SECS
}

fn default_search_limit() -> u32 {
    constants::DEFAULT_SEARCH_LIMIT
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            api_timeout_ms: default_api_timeout(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            provider: default_sms_provider(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: default_from_number(),
            api_base: default_twilio_base(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            wal_mode: true,
            pool_size: default_pool_size(),
            integrity_check_on_startup: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            code_ttl_secs: default_code_ttl(),
        }
    }
}

impl Default for ContactsConfig {
    fn default() -> Self {
        Self {
            search_limit: default_search_limit(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            show_preview: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default config file path, then apply
    /// environment overrides.
    pub fn load_default() -> LcResult<Self> {
        let path = Self::default_config_path()?;
        let mut config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> LcResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default config file path.
    pub fn save_default(&self) -> LcResult<()> {
        let path = Self::default_config_path()?;
        self.save_to_file(&path)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> LcResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| LcError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Overlay credentials from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(constants::env::BACKEND_URL) {
            self.backend.url = Self::sanitize_backend_url(&v);
        }
        if let Some(v) = get(constants::env::BACKEND_ANON_KEY) {
            self.backend.anon_key = v;
        }
        if let Some(v) = get(constants::env::TWILIO_ACCOUNT_SID) {
            self.sms.account_sid = v;
        }
        if let Some(v) = get(constants::env::TWILIO_AUTH_TOKEN) {
            self.sms.auth_token = v;
        }
        if let Some(v) = get(constants::env::TWILIO_FROM_NUMBER) {
            self.sms.from_number = v;
        }
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> LcResult<PathBuf> {
        let config_dir = Platform::config_dir()?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get the effective database path, using the configured path or the default.
    pub fn effective_db_path(&self) -> LcResult<PathBuf> {
        if self.database.path.is_empty() {
            let data_dir = Platform::data_dir()?;
            Ok(data_dir.join("latamchat.db"))
        } else {
            Ok(PathBuf::from(&self.database.path))
        }
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> LcResult<PathBuf> {
        if self.logging.directory.is_empty() {
            let data_dir = Platform::data_dir()?;
            Ok(data_dir.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether the backend project is configured.
    pub fn is_backend_configured(&self) -> bool {
        !self.backend.url.is_empty() && !self.backend.anon_key.is_empty()
    }

    /// Check whether Twilio credentials are present.
    pub fn is_sms_configured(&self) -> bool {
        match self.sms.provider {
            SmsProvider::Console => true,
            SmsProvider::Twilio => {
                !self.sms.account_sid.is_empty() && !self.sms.auth_token.is_empty()
            }
        }
    }

    /// Normalize a backend project URL.
    ///
    /// Adds `https://` when no scheme is given and strips trailing slashes.
    pub fn sanitize_backend_url(url: &str) -> String {
        let trimmed = url.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access across services.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }
}
