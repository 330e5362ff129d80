//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "LatamChat";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// File name prefix for rotated logs.
pub const LOG_FILE_PREFIX: &str = "latamchat.log";

/// Local database schema version.
pub const DB_SCHEMA_VERSION: i32 = 2;

/// Default backend API timeout in milliseconds.
pub const DEFAULT_API_TIMEOUT_MS: u64 = 30_000;

/// Realtime heartbeat interval in seconds.
pub const REALTIME_HEARTBEAT_SECS: u64 = 30;

/// Realtime protocol version sent in the websocket URL.
pub const REALTIME_VSN: &str = "1.0.0";

/// A verification code is valid for 15 minutes after issue.
pub const VERIFICATION_CODE_TTL_SECS: u64 = 15 * 60;

/// Number of digits in a generated verification code.
pub const VERIFICATION_CODE_DIGITS: u32 = 6;

/// Default cap on phone search results.
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;

/// Twilio REST base URL.
pub const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Twilio magic test sender number.
pub const TWILIO_TEST_FROM_NUMBER: &str = "+15005550006";

/// Twilio error code for a recipient not verified on a trial account.
pub const TWILIO_UNVERIFIED_NUMBER: i64 = 21211;

/// Notification title for direct chats.
pub const DIRECT_NOTIFICATION_TITLE: &str = "New message";

/// Notification title for unnamed group chats.
pub const GROUP_NOTIFICATION_TITLE: &str = "Group";

/// Backend table names.
pub mod tables {
    pub const USERS: &str = "users";
    pub const CHATS: &str = "chats";
    pub const CHAT_PARTICIPANTS: &str = "chat_participants";
    pub const MESSAGES: &str = "messages";
    pub const CONTACTS: &str = "contacts";

    /// All relations the client reads or writes.
    pub const ALL: &[&str] = &[USERS, CHATS, CHAT_PARTICIPANTS, MESSAGES, CONTACTS];
}

/// Keys in the local key-value store.
pub mod store_keys {
    /// Persisted signed-in user record.
    pub const USER_DATA: &str = "user_data";
    /// Pending phone verification.
    pub const VERIFICATION_CODE: &str = "verification_code";
    /// Backend session restored on the next start.
    pub const AUTH_SESSION: &str = "auth_session";
}

/// Environment variables that override file configuration.
pub mod env {
    pub const BACKEND_URL: &str = "SUPABASE_URL";
    pub const BACKEND_ANON_KEY: &str = "SUPABASE_ANON_KEY";
    pub const TWILIO_ACCOUNT_SID: &str = "TWILIO_ACCOUNT_SID";
    pub const TWILIO_AUTH_TOKEN: &str = "TWILIO_AUTH_TOKEN";
    pub const TWILIO_FROM_NUMBER: &str = "TWILIO_FROM_NUMBER";
}
