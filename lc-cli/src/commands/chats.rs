//! Chat commands.

use clap::Subcommand;
use comfy_table::{Table, presets::UTF8_FULL, modifiers::UTF8_ROUND_CORNERS, ContentArrangement};
use console::style;

use lc_core::config::AppConfig;
use lc_core::error::{LcError, LcResult};
use lc_models::Chat;
use lc_services::notification::notification_title;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ChatsAction {
    /// List your chats, most recent activity first.
    List,
    /// Start a chat with one or more users.
    Create {
        /// User ids of the other participants.
        #[arg(required = true)]
        participants: Vec<String>,
        /// Force group mode even with a single other participant.
        #[arg(long)]
        group: bool,
        /// Chat name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Show details for one chat.
    Get {
        /// Chat id.
        id: String,
    },
}

pub async fn run(config: AppConfig, offline: bool, action: ChatsAction, format: OutputFormat) -> LcResult<()> {
    let ctx = super::build_context(config, offline).await?;
    let user = ctx.current_user().await?;
    let messaging = ctx.registry.messaging.clone();

    match action {
        ChatsAction::List => {
            let chats = messaging.list_chats(&user.id).await?;
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!(chats)),
                OutputFormat::Text => {
                    if chats.is_empty() {
                        println!("No chats found.");
                    } else {
                        let mut table = Table::new();
                        table
                            .load_preset(UTF8_FULL)
                            .apply_modifier(UTF8_ROUND_CORNERS)
                            .set_content_arrangement(ContentArrangement::Dynamic);

                        table.set_header(vec!["Chat", "ID", "Last Message", "When"]);

                        for chat in &chats {
                            let last = chat
                                .last_message
                                .as_ref()
                                .map(|m| super::truncate(&m.preview(), 40))
                                .unwrap_or_else(|| "-".to_string());
                            table.add_row(vec![
                                super::truncate(&chat_label(chat, &user.id), 30),
                                chat.id.clone(),
                                last,
                                super::short_time(&chat.last_activity()),
                            ]);
                        }

                        println!("{table}");
                        println!("\n{} chats", chats.len());
                    }
                }
            }
        }
        ChatsAction::Create { participants, group, name } => {
            let mut members = vec![user.id.clone()];
            for id in participants {
                if !members.contains(&id) {
                    members.push(id);
                }
            }
            let is_group = group.then_some(true);
            let chat = messaging.create_chat(&members, is_group, name.as_deref()).await?;
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!(chat)),
                OutputFormat::Text => {
                    println!(
                        "{} Created {} chat {}",
                        style("✓").green(),
                        if chat.is_group { "group" } else { "direct" },
                        chat.id
                    );
                }
            }
        }
        ChatsAction::Get { id } => {
            let chat = messaging
                .get_chat(&id)
                .await?
                .ok_or_else(|| LcError::ChatNotFound(id.clone()))?;
            let messages = messaging.list_messages(&id).await?;

            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "chat": chat,
                    "message_count": messages.len(),
                })),
                OutputFormat::Text => {
                    println!("{}", style("Chat Details").bold().underlined());
                    println!("  Title:        {}", chat_label(&chat, &user.id));
                    println!("  ID:           {}", chat.id);
                    println!("  Type:         {}", if chat.is_group { "group" } else { "direct" });
                    println!("  Created:      {}", super::short_time(&chat.created_at));
                    println!("  Messages:     {}", messages.len());
                    println!("  Participants:");
                    for p in &chat.participants {
                        let me = if *p == user.id { " (you)" } else { "" };
                        println!("    - {p}{me}");
                    }
                }
            }
        }
    }

    ctx.shutdown().await
}

/// Name shown for a chat: its own name, the peer in a direct chat, or the
/// notification title as a last resort.
fn chat_label(chat: &Chat, user_id: &str) -> String {
    if let Some(name) = chat.name.as_deref().filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }
    match chat.peer_of(user_id) {
        Some(peer) if chat.is_one_to_one() => peer.to_string(),
        _ => notification_title(chat),
    }
}
