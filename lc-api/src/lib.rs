//! LatamChat API - backend clients.
//!
//! This crate provides the `Backend` trait used by every service (row
//! storage, realtime channels, auth) and its two implementations:
//! - `RestBackend`: the hosted project over HTTP (PostgREST + GoTrue) and websocket
//! - `LocalBackend`: an in-process backend on the local SQLite database, used
//!   offline and in tests
//!
//! It also provides the SMS gateways used for phone verification.

pub mod backend;
pub mod local;
pub mod query;
pub mod rest;
pub mod sms;

// Re-export key types
pub use backend::{Backend, SharedBackend};
pub use local::LocalBackend;
pub use query::{Filter, Order, Query};
pub use rest::RestBackend;
pub use sms::{gateway_from_config, ConsoleGateway, SmsGateway, TwilioGateway};
