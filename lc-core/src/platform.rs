//! OS-specific directories and the device label.

use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::error::{LcError, LcResult};

/// Namespace for per-user locations on the host OS.
pub struct Platform;

impl Platform {
    /// Application data directory (database, logs).
    ///
    /// - Linux: `~/.local/share/LatamChat`
    /// - macOS: `~/Library/Application Support/LatamChat`
    pub fn data_dir() -> LcResult<PathBuf> {
        dirs::data_dir()
            .map(|base| base.join(APP_NAME))
            .ok_or_else(|| LcError::Config("could not determine data directory".into()))
    }

    /// Application configuration directory (`config.toml`).
    pub fn config_dir() -> LcResult<PathBuf> {
        dirs::config_dir()
            .map(|base| base.join(APP_NAME))
            .ok_or_else(|| LcError::Config("could not determine config directory".into()))
    }

    /// Host label written to the log at start-up.
    pub fn device_name() -> String {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "latamchat-client".to_string())
    }
}
