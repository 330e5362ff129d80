//! Message commands, including the live `watch` mode.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use comfy_table::{Table, presets::UTF8_FULL, modifiers::UTF8_ROUND_CORNERS, ContentArrangement};
use console::style;
use tokio::sync::mpsc;
use tracing::{info, warn};

use lc_core::config::AppConfig;
use lc_core::error::{LcError, LcResult};
use lc_models::{MediaAttachment, Message, MessageStatus};
use lc_services::{ChatListState, ChatRoomState};
use crate::OutputFormat;

use super::AppContext;

#[derive(Subcommand)]
pub enum MessagesAction {
    /// List the messages in a chat, oldest first.
    List {
        /// Chat id.
        chat: String,
        /// Only show the most recent N messages.
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Mark messages from other participants as read.
        #[arg(long)]
        mark_read: bool,
    },
    /// Send a text message.
    Send {
        /// Chat id.
        chat: String,
        /// Message text.
        text: String,
    },
    /// Send a file as a media message.
    SendFile {
        /// Chat id.
        chat: String,
        /// Path to the file.
        path: PathBuf,
        /// Override the detected MIME type.
        #[arg(long)]
        mime: Option<String>,
    },
    /// Set the delivery status of a message.
    Status {
        /// Message id.
        id: String,
        /// New status (sent, delivered, read).
        status: MessageStatus,
    },
    /// Print messages as they arrive until interrupted.
    Watch {
        /// Watch a single chat instead of all of yours.
        #[arg(long)]
        chat: Option<String>,
        /// Do not show desktop notifications.
        #[arg(long)]
        quiet: bool,
    },
}

pub async fn run(config: AppConfig, offline: bool, action: MessagesAction, format: OutputFormat) -> LcResult<()> {
    let ctx = super::build_context(config, offline).await?;
    let user = ctx.current_user().await?;
    let messaging = ctx.registry.messaging.clone();

    match action {
        MessagesAction::List { chat, limit, mark_read } => {
            let messages = messaging.list_messages(&chat).await?;
            let mut room = ChatRoomState::new(chat.clone(), messages);
            let marked = if mark_read {
                messaging.mark_room_read(&mut room, &user.id).await?
            } else {
                0
            };

            let all = room.messages();
            let shown = match limit {
                Some(n) if n < all.len() => &all[all.len() - n..],
                _ => all,
            };

            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "chat_id": chat,
                    "messages": shown,
                    "marked_read": marked,
                })),
                OutputFormat::Text => {
                    if shown.is_empty() {
                        println!("No messages in this chat.");
                    } else {
                        let mut table = Table::new();
                        table
                            .load_preset(UTF8_FULL)
                            .apply_modifier(UTF8_ROUND_CORNERS)
                            .set_content_arrangement(ContentArrangement::Dynamic);

                        table.set_header(vec!["When", "From", "Message", "Status"]);

                        for m in shown {
                            let from = if m.is_from(&user.id) { "me".to_string() } else { m.sender_id.clone() };
                            table.add_row(vec![
                                super::short_time(&m.created_at),
                                super::truncate(&from, 20),
                                super::truncate(&m.preview(), 60),
                                m.status.to_string(),
                            ]);
                        }

                        println!("{table}");
                        if marked > 0 {
                            println!("\nMarked {marked} messages as read.");
                        }
                    }
                }
            }
        }
        MessagesAction::Send { chat, text } => {
            let message = messaging.send_message(&chat, &text, &user.id).await?;
            print_sent(&message, format);
        }
        MessagesAction::SendFile { chat, path, mime } => {
            let media = media_from_path(&path, mime)?;
            let message = messaging.send_media_message(&chat, &user.id, &media).await?;
            print_sent(&message, format);
        }
        MessagesAction::Status { id, status } => {
            let message = messaging.update_message_status(&id, status).await?;
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!(message)),
                OutputFormat::Text => println!("{} Message {} is now {}", style("✓").green(), message.id, message.status),
            }
        }
        MessagesAction::Watch { chat, quiet } => {
            watch(&ctx, &user.id, chat, quiet, format).await?;
        }
    }

    ctx.shutdown().await
}

fn print_sent(message: &Message, format: OutputFormat) {
    match format {
        OutputFormat::Json => super::print_json(&serde_json::json!(message)),
        OutputFormat::Text => {
            println!("{} Sent {} at {}", style("✓").green(), message.id, super::short_time(&message.created_at));
        }
    }
}

/// Describe a local file as a media attachment. The URI is the file's
/// absolute location; uploading the bytes is left to the storage layer.
fn media_from_path(path: &Path, mime: Option<String>) -> LcResult<MediaAttachment> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
        return Err(LcError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a file", path.display()),
        )));
    }
    let absolute = std::fs::canonicalize(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let mime = mime.unwrap_or_else(|| guess_mime(path).to_string());

    Ok(MediaAttachment::new(
        format!("file://{}", absolute.display()),
        mime,
        name,
        meta.len(),
    ))
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

async fn watch(ctx: &AppContext, user_id: &str, chat: Option<String>, quiet: bool, format: OutputFormat) -> LcResult<()> {
    let messaging = &ctx.registry.messaging;

    let mut list = ChatListState::new(messaging.list_chats(user_id).await?);
    let watched = match &chat {
        Some(id) => {
            messaging.subscribe_to_chat(id).await?;
            1
        }
        None => messaging.subscribe_to_user_chats(user_id).await?,
    };

    // Listeners run on the delivery task; hand messages to this loop instead.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let _listener = messaging.on_message(move |message: &Message| {
        tx.send(message.clone())
            .map_err(|e| LcError::Internal(format!("watch loop closed: {e}")))
    });

    info!(watched, "watching for messages");
    if let OutputFormat::Text = format {
        println!(
            "{} Watching {watched} chat(s). Press Ctrl+C to stop.",
            style("●").green()
        );
    }

    loop {
        tokio::select! {
            maybe = rx.recv() => {
                let Some(message) = maybe else { break };
                list.apply_message(message.clone());

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string(&message).unwrap_or_default());
                    }
                    OutputFormat::Text => {
                        let from = if message.is_from(user_id) { "me" } else { message.sender_id.as_str() };
                        println!(
                            "[{}] {} {}: {}",
                            super::short_time(&message.created_at),
                            style(&message.chat_id).dim(),
                            style(from).bold(),
                            message.preview()
                        );
                    }
                }

                if !quiet {
                    notify(ctx, &list, &message, user_id).await;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("watch interrupted");
                break;
            }
        }
    }

    if let OutputFormat::Text = format {
        println!("Stopped watching.");
    }
    Ok(())
}

async fn notify(ctx: &AppContext, list: &ChatListState, message: &Message, user_id: &str) {
    let chat = match list.get(&message.chat_id) {
        Some(chat) => Some(chat.clone()),
        None => ctx.registry.messaging.get_chat(&message.chat_id).await.ok().flatten(),
    };
    let Some(chat) = chat else {
        warn!(chat_id = %message.chat_id, "no chat for incoming message, skipping notification");
        return;
    };
    let notifications = &ctx.registry.notifications;
    match notifications.show_for_message(&chat, message, user_id) {
        Ok(true) => {
            if let Err(e) = notifications.set_badge_count(notifications.badge_count() + 1) {
                warn!("badge update failed: {e}");
            }
        }
        Ok(false) => {}
        Err(e) => warn!("notification failed: {e}"),
    }
}
