//! Database management commands.

use clap::Subcommand;
use comfy_table::{Table, presets::UTF8_FULL, modifiers::UTF8_ROUND_CORNERS, ContentArrangement};
use console::style;

use lc_core::config::AppConfig;
use lc_core::error::LcResult;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum DbAction {
    /// Show database statistics.
    Stats,
    /// Run an integrity check.
    Check,
    /// Reset the database (WARNING: destroys the stored session and all offline data).
    Reset {
        /// Skip the confirmation refusal.
        #[arg(long)]
        yes: bool,
    },
    /// Show the database file path.
    Path,
}

pub async fn run(config: AppConfig, action: DbAction, format: OutputFormat) -> LcResult<()> {
    let db_path = config.effective_db_path()?;

    match action {
        DbAction::Stats => {
            let db = super::init_database(&config)?;
            let stats = db.stats()?;
            let file_size = std::fs::metadata(&db_path).ok().map(|m| m.len());
            let wal_size = std::fs::metadata(db_path.with_extension("db-wal")).ok().map(|m| m.len());

            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "path": db_path.display().to_string(),
                    "stored_keys": stats.stored_keys,
                    "auth_users": stats.auth_users,
                    "rows": stats.rows,
                    "file_size_bytes": file_size,
                    "wal_size_bytes": wal_size,
                })),
                OutputFormat::Text => {
                    println!("{}", style("Database Statistics").bold().underlined());
                    println!("  Path:          {}", db_path.display());
                    println!("  Stored keys:   {}", stats.stored_keys);
                    println!("  Local users:   {}", stats.auth_users);
                    println!();

                    if stats.rows.is_empty() {
                        println!("  No offline backend rows.");
                    } else {
                        let mut table = Table::new();
                        table
                            .load_preset(UTF8_FULL)
                            .apply_modifier(UTF8_ROUND_CORNERS)
                            .set_content_arrangement(ContentArrangement::Dynamic);

                        table.set_header(vec!["Relation", "Row Count"]);
                        for (relation, n) in &stats.rows {
                            table.add_row(vec![relation.clone(), n.to_string()]);
                        }
                        println!("{table}");
                    }

                    println!();
                    println!("{}", style("Storage").bold().underlined());
                    if let Some(size) = file_size {
                        println!("  Database:      {}", super::format_bytes(size));
                    }
                    if let Some(size) = wal_size {
                        println!("  WAL file:      {}", super::format_bytes(size));
                    }
                }
            }
        }
        DbAction::Check => {
            let db = super::init_database(&config)?;
            let result = db.run_integrity_check();
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "ok": result.is_ok(),
                    "error": result.as_ref().err().map(|e| e.to_string()),
                })),
                OutputFormat::Text => match &result {
                    Ok(()) => println!("  {} Integrity check passed.", style("OK").green().bold()),
                    Err(e) => println!("  {} Integrity check failed: {}", style("FAIL").red().bold(), e),
                },
            }
            result?;
        }
        DbAction::Reset { yes } => {
            if !yes {
                println!(
                    "{} This deletes the stored session and all offline data. Re-run with --yes to confirm.",
                    style("WARNING").yellow().bold()
                );
                return Ok(());
            }
            let db = super::init_database(&config)?;
            db.reset()?;
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!({ "reset": true })),
                OutputFormat::Text => println!("{} Database reset.", style("✓").green()),
            }
        }
        DbAction::Path => match format {
            OutputFormat::Json => super::print_json(&serde_json::json!({
                "path": db_path.display().to_string(),
                "exists": db_path.exists(),
            })),
            OutputFormat::Text => println!("{}", db_path.display()),
        },
    }

    Ok(())
}
