//! Structured logging setup using the `tracing` ecosystem.
//!
//! Console output goes to stderr; a daily-rotated file under the configured
//! log directory receives either plain or JSON lines.

use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;
use crate::constants::LOG_FILE_PREFIX;
use crate::error::{LcError, LcResult};

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Build an env filter, falling back to `info` on a malformed directive.
///
/// `RUST_LOG` wins over the configured level when it is set.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber with console and file output.
///
/// # Arguments
/// * `level` - Log level or filter directive, e.g. "debug" or "lc_services=trace"
/// * `log_dir` - Directory for rotated log files
/// * `json_output` - Write JSON lines to the file instead of plain text
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> LcResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    // The two file layers have different types, so each branch installs its own stack.
    let installed = if json_output {
        tracing_subscriber::registry()
            .with(build_filter(level))
            .with(console_layer)
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .with_current_span(false)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(build_filter(level))
            .with(console_layer)
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    };
    installed.map_err(|e| LcError::Internal(format!("logger already installed: {e}")))?;

    tracing::info!(level, dir = %log_dir.display(), json = json_output, "logging initialized");
    Ok(LogGuard { _guard: guard })
}

/// Initialize logging from the `[logging]` section of the application config.
pub fn init_from_config(config: &AppConfig) -> LcResult<LogGuard> {
    let dir = config.effective_log_dir()?;
    init_logging(&config.logging.level, &dir, config.logging.json_output)
}

/// Initialize a minimal console-only logger for tests or short CLI runs.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .try_init();
}

/// Map a `-v` repetition count from the CLI to a level string.
pub fn level_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
