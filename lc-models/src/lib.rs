//! LatamChat Models - domain records, local database, and key-value store.
//!
//! Domain records mirror the backend relations (`users`, `chats`,
//! `chat_participants`, `messages`, `contacts`) and decode from the JSON rows
//! the backend returns. The local SQLite database holds the persisted session
//! state and, for offline use, the rows of the in-process backend.

pub mod db;
pub mod schema;
pub mod models;
pub mod migrations;
pub mod store;

// Re-export key types
pub use db::{Database, DbPool};
pub use models::chat::Chat;
pub use models::contact::Contact;
pub use models::message::{MediaAttachment, MediaKind, Message, MessageStatus};
pub use models::session::{AuthUser, Session};
pub use models::user::{ProfileUpdate, User};
pub use models::verification::PendingVerification;
pub use store::LocalStore;
