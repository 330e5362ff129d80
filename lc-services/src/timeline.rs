//! View state for the chat list and an open chat room.
//!
//! These hold what a screen shows and reconcile it with messages arriving
//! over chat subscriptions. They do no I/O.

use lc_models::models::chat::sort_by_activity;
use lc_models::{Chat, Message, MessageStatus};

/// Chats of the signed-in user, most recently active first.
#[derive(Debug, Clone, Default)]
pub struct ChatListState {
    chats: Vec<Chat>,
}

impl ChatListState {
    pub fn new(mut chats: Vec<Chat>) -> Self {
        sort_by_activity(&mut chats);
        Self { chats }
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn get(&self, chat_id: &str) -> Option<&Chat> {
        self.chats.iter().find(|c| c.id == chat_id)
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Replace the whole list after a reload.
    pub fn replace_all(&mut self, chats: Vec<Chat>) {
        self.chats = chats;
        sort_by_activity(&mut self.chats);
    }

    /// Make `message` the last message of its chat and re-sort.
    ///
    /// Returns false when the chat is not in the list; the caller should
    /// reload, since a chat created elsewhere is not announced.
    pub fn apply_message(&mut self, message: Message) -> bool {
        let Some(chat) = self.chats.iter_mut().find(|c| c.id == message.chat_id) else {
            return false;
        };
        chat.last_message = Some(message);
        sort_by_activity(&mut self.chats);
        true
    }
}

/// Messages of one open chat, oldest first.
#[derive(Debug, Clone)]
pub struct ChatRoomState {
    chat_id: String,
    messages: Vec<Message>,
}

impl ChatRoomState {
    pub fn new(chat_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            chat_id: chat_id.into(),
            messages,
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append an inbound message.
    ///
    /// Messages for other chats are ignored. A message already present (by
    /// id) is replaced in place, which covers the echo of our own sends.
    pub fn push(&mut self, message: Message) -> bool {
        if message.chat_id != self.chat_id {
            return false;
        }
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => self.messages.push(message),
        }
        true
    }

    /// Record a status change for a message in this room.
    pub fn apply_status(&mut self, message_id: &str, status: MessageStatus) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(m) => {
                m.status = status;
                true
            }
            None => false,
        }
    }

    /// Ids of messages from other participants that are not yet read.
    pub fn unread_from_others(&self, current_user_id: &str) -> Vec<String> {
        self.messages
            .iter()
            .filter(|m| !m.is_from(current_user_id) && m.status != MessageStatus::Read)
            .map(|m| m.id.clone())
            .collect()
    }
}
