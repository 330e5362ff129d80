//! LatamChat Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by all other LatamChat crates:
//! - Application configuration (backend project, SMS provider, policies)
//! - A single error type covering backend, verification, and permission failures
//! - Structured logging with tracing
//! - Platform directories and phone number helpers
//! - Common constants

pub mod config;
pub mod error;
pub mod logging;
pub mod phone;
pub mod platform;
pub mod constants;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConfigHandle};
pub use error::{ErrorCategory, LcError, LcResult, VerificationFailure};
pub use logging::init_logging;
pub use platform::Platform;
