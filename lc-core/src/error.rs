//! Global error types for the LatamChat client.
//!
//! Every failure a service can raise is folded into the single `LcError`
//! enum. Screens only need to tell three families apart (backend,
//! verification, permission), which `LcError::category` provides.

use thiserror::Error;

/// Convenience type alias for Results using LcError.
pub type LcResult<T> = Result<T, LcError>;

/// Reason a phone verification attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFailure {
    /// No pending verification record exists.
    Missing,
    /// The pending code was issued too long ago.
    Expired,
    /// The submitted code does not match the pending one.
    Mismatch,
}

impl std::fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            VerificationFailure::Missing => "no pending verification",
            VerificationFailure::Expired => "verification code expired",
            VerificationFailure::Mismatch => "invalid verification code",
        };
        f.write_str(text)
    }
}

/// Coarse grouping used at the presentation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Anything the backend, SMS provider, or network rejected.
    Backend,
    /// A phone verification step failed.
    Verification,
    /// The OS refused a capability (notifications).
    Permission,
    /// Local failures: config, storage, programming errors.
    Local,
}

/// Unified error type covering all error categories in LatamChat.
#[derive(Error, Debug)]
pub enum LcError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Local storage errors --
    /// SQLite database error.
    #[error("database error: {0}")]
    Database(String),

    /// Database migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database connection pool error.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Database integrity check failed.
    #[error("database integrity check failed: {0}")]
    IntegrityCheck(String),

    // -- Backend errors --
    /// HTTP transport failure (connect, timeout, decode).
    #[error("http error: {0}")]
    Http(String),

    /// The backend answered with an error response.
    #[error("backend error (status {status}): {message}")]
    Backend {
        /// HTTP status code, or 0 when the failure was not HTTP shaped.
        status: u16,
        /// Error message from the backend.
        message: String,
    },

    /// Sign up, sign in, or session lookup was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Realtime websocket failure.
    #[error("realtime error: {0}")]
    Realtime(String),

    /// The SMS provider rejected a delivery.
    #[error("sms error: {0}")]
    Sms(String),

    // -- Identity errors --
    /// Phone verification failed.
    #[error("verification failed: {0}")]
    Verification(VerificationFailure),

    /// The phone number is not in a dialable international format.
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    /// An operation needs a signed-in user.
    #[error("not signed in")]
    NotSignedIn,

    /// No user row exists for the given id.
    #[error("user not found: {0}")]
    UserNotFound(String),

    // -- Messaging errors --
    /// Message not found.
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// Chat not found.
    #[error("chat not found: {0}")]
    ChatNotFound(String),

    /// A status change would move a message backwards.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    // -- Notification errors --
    /// The user or OS denied notification permission.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Desktop notification failed.
    #[error("notification error: {0}")]
    Notification(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Service errors --
    /// A service is not yet initialized.
    #[error("service not initialized: {0}")]
    ServiceNotInitialized(String),

    /// A service operation failed.
    #[error("service error: {0}")]
    Service(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LcError {
    /// Shorthand for a backend error without an HTTP status.
    pub fn backend(message: impl Into<String>) -> Self {
        LcError::Backend {
            status: 0,
            message: message.into(),
        }
    }

    /// Group this error for display at the screen boundary.
    pub fn category(&self) -> ErrorCategory {
        match self {
            LcError::Http(_)
            | LcError::Backend { .. }
            | LcError::AuthFailed(_)
            | LcError::Realtime(_)
            | LcError::Sms(_) => ErrorCategory::Backend,
            LcError::Verification(_) => ErrorCategory::Verification,
            LcError::Permission(_) => ErrorCategory::Permission,
            _ => ErrorCategory::Local,
        }
    }

    /// Whether the error came from the remote backend or SMS provider.
    pub fn is_backend(&self) -> bool {
        self.category() == ErrorCategory::Backend
    }
}

impl From<serde_json::Error> for LcError {
    fn from(e: serde_json::Error) -> Self {
        LcError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for LcError {
    fn from(e: toml::de::Error) -> Self {
        LcError::Config(e.to_string())
    }
}

impl From<VerificationFailure> for LcError {
    fn from(reason: VerificationFailure) -> Self {
        LcError::Verification(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lc_error_display() {
        let err = LcError::Config("bad value".to_string());
        assert_eq!(err.to_string(), "configuration error: bad value");

        let err = LcError::Verification(VerificationFailure::Expired);
        assert_eq!(err.to_string(), "verification failed: verification code expired");
    }

    #[test]
    fn test_categories() {
        assert_eq!(LcError::backend("boom").category(), ErrorCategory::Backend);
        assert_eq!(
            LcError::Backend { status: 409, message: "dup".into() }.category(),
            ErrorCategory::Backend
        );
        assert_eq!(
            LcError::from(VerificationFailure::Mismatch).category(),
            ErrorCategory::Verification
        );
        assert_eq!(LcError::Permission("denied".into()).category(), ErrorCategory::Permission);
        assert_eq!(LcError::Database("locked".into()).category(), ErrorCategory::Local);
        assert!(LcError::Sms("21211".into()).is_backend());
        assert!(!LcError::NotSignedIn.is_backend());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: LcError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, LcError::Serialization(_)));
    }
}
