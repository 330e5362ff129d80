//! LatamChat CLI - command-line client for LatamChat.
//!
//! Drives every service from the terminal: phone verification and sign-in,
//! chats, messages (including a live watch mode), contacts, and local
//! database maintenance. `--offline` swaps the hosted backend for the
//! in-process one stored in the local database.

mod commands;

use clap::{ArgAction, Parser, Subcommand};
use tracing::info;

use lc_core::config::AppConfig;
use lc_core::error::LcResult;
use lc_core::logging;

/// LatamChat - phone-number messaging for Latin America.
#[derive(Parser)]
#[command(
    name = "latamchat",
    version,
    about = "LatamChat messaging client CLI",
    long_about = "A command-line interface for the LatamChat messaging client.\n\
                   Verify a phone number, chat with contacts, and watch messages arrive live."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Use the local in-process backend instead of the hosted project.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Phone verification, registration, and sign-in.
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// List and create chats.
    Chats {
        #[command(subcommand)]
        action: commands::chats::ChatsAction,
    },
    /// Read, send, and watch messages.
    Messages {
        #[command(subcommand)]
        action: commands::messages::MessagesAction,
    },
    /// Manage contacts and search users by phone.
    Contacts {
        #[command(subcommand)]
        action: commands::contacts::ContactsAction,
    },
    /// Local database maintenance.
    Db {
        #[command(subcommand)]
        action: commands::db::DbAction,
    },
    /// Show or create the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn load_config(path: Option<&str>) -> LcResult<AppConfig> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from_file(std::path::Path::new(path))?;
            config.apply_env_overrides();
            Ok(config)
        }
        None => AppConfig::load_default(),
    }
}

#[tokio::main]
async fn main() -> LcResult<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if cli.verbose > 0 {
        config.logging.level = logging::level_for_verbosity(cli.verbose).to_string();
    }
    let _guard = logging::init_from_config(&config)?;

    info!(
        "LatamChat CLI v{} on {}",
        lc_core::constants::APP_VERSION,
        lc_core::Platform::device_name()
    );

    let offline = cli.offline;
    let format = cli.format;

    match cli.command {
        Commands::Auth { action } => commands::auth::run(config, offline, action, format).await,
        Commands::Chats { action } => commands::chats::run(config, offline, action, format).await,
        Commands::Messages { action } => {
            commands::messages::run(config, offline, action, format).await
        }
        Commands::Contacts { action } => {
            commands::contacts::run(config, offline, action, format).await
        }
        Commands::Db { action } => commands::db::run(config, action, format).await,
        Commands::Config { action } => {
            commands::config::run(config, cli.config.as_deref(), action, format)
        }
    }
}
