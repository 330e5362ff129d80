//! Configuration commands.

use std::path::PathBuf;

use clap::Subcommand;
use console::style;

use lc_core::config::AppConfig;
use lc_core::error::{LcError, LcResult};
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration with secrets masked.
    Show,
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Show the configuration file path.
    Path,
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        "(not set)".to_string()
    } else {
        "********".to_string()
    }
}

fn target_path(explicit: Option<&str>) -> LcResult<PathBuf> {
    match explicit {
        Some(p) => Ok(PathBuf::from(p)),
        None => AppConfig::default_config_path(),
    }
}

pub fn run(config: AppConfig, explicit_path: Option<&str>, action: ConfigAction, format: OutputFormat) -> LcResult<()> {
    match action {
        ConfigAction::Show => {
            let mut shown = config.clone();
            shown.backend.anon_key = mask(&shown.backend.anon_key);
            shown.sms.auth_token = mask(&shown.sms.auth_token);

            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!(shown)),
                OutputFormat::Text => {
                    let text = toml::to_string_pretty(&shown)
                        .map_err(|e| LcError::Config(format!("failed to render config: {e}")))?;
                    println!("{}", style("Configuration").bold().underlined());
                    println!("{text}");
                    println!(
                        "Backend configured: {}   SMS configured: {}",
                        yes_no(config.is_backend_configured()),
                        yes_no(config.is_sms_configured())
                    );
                }
            }
        }
        ConfigAction::Init { force } => {
            let path = target_path(explicit_path)?;
            if path.exists() && !force {
                println!("{} already exists; pass --force to overwrite.", path.display());
                return Ok(());
            }
            match explicit_path {
                Some(_) => AppConfig::default().save_to_file(&path)?,
                None => AppConfig::default().save_default()?,
            }
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!({ "path": path.display().to_string() })),
                OutputFormat::Text => println!("{} Wrote {}", style("✓").green(), path.display()),
            }
        }
        ConfigAction::Path => {
            let path = target_path(explicit_path)?;
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "path": path.display().to_string(),
                    "exists": path.exists(),
                })),
                OutputFormat::Text => println!("{}", path.display()),
            }
        }
    }
    Ok(())
}

fn yes_no(v: bool) -> &'static str {
    if v { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask() {
        assert_eq!(mask(""), "(not set)");
        assert_eq!(mask("secret"), "********");
    }
}
