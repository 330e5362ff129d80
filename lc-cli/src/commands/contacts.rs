//! Contact commands.

use clap::Subcommand;
use comfy_table::{Table, presets::UTF8_FULL, modifiers::UTF8_ROUND_CORNERS, ContentArrangement};
use console::style;

use lc_core::config::AppConfig;
use lc_core::error::LcResult;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ContactsAction {
    /// List saved contacts.
    List,
    /// Save a user as a contact.
    Add {
        /// User id of the contact.
        user_id: String,
    },
    /// Remove a saved contact.
    Remove {
        /// User id of the contact.
        user_id: String,
    },
    /// Find users whose phone number contains the given digits.
    Search {
        /// Partial phone number.
        phone: String,
    },
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub async fn run(config: AppConfig, offline: bool, action: ContactsAction, format: OutputFormat) -> LcResult<()> {
    let ctx = super::build_context(config, offline).await?;
    let contacts = ctx.registry.contacts.clone();

    match action {
        ContactsAction::List => {
            let user = ctx.current_user().await?;
            let list = contacts.list_contacts(&user.id).await?;
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!(list)),
                OutputFormat::Text => {
                    if list.is_empty() {
                        println!("No contacts yet. Try `latamchat contacts search <digits>`.");
                    } else {
                        let mut table = new_table();
                        table.set_header(vec!["Name", "User ID", "Status"]);
                        for c in &list {
                            table.add_row(vec![
                                super::truncate(&c.name, 30),
                                c.contact_id.clone(),
                                super::truncate(&c.status, 40),
                            ]);
                        }
                        println!("{table}");
                        println!("\n{} contacts", list.len());
                    }
                }
            }
        }
        ContactsAction::Add { user_id } => {
            let user = ctx.current_user().await?;
            let contact = contacts.add_contact(&user.id, &user_id).await?;
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!(contact)),
                OutputFormat::Text => println!("{} Added {}", style("✓").green(), contact.name),
            }
        }
        ContactsAction::Remove { user_id } => {
            let user = ctx.current_user().await?;
            let removed = contacts.remove_contact(&user.id, &user_id).await?;
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!({ "removed": removed })),
                OutputFormat::Text if removed => println!("Removed {user_id}."),
                OutputFormat::Text => println!("{user_id} was not a contact."),
            }
        }
        ContactsAction::Search { phone } => {
            let users = contacts.search_users_by_phone(&phone).await?;
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!(users)),
                OutputFormat::Text => {
                    if users.is_empty() {
                        println!("No users match \"{phone}\".");
                    } else {
                        let mut table = new_table();
                        table.set_header(vec!["Name", "Phone", "User ID"]);
                        for u in &users {
                            table.add_row(vec![
                                super::truncate(u.display_name(), 30),
                                u.phone.clone(),
                                u.id.clone(),
                            ]);
                        }
                        println!("{table}");
                    }
                }
            }
        }
    }

    ctx.shutdown().await
}
