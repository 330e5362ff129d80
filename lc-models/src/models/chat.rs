//! Chat (conversation) model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use lc_core::error::LcResult;

use super::message::Message;
use super::{required_str, str_field, time_field};

/// A conversation, one row of the `chats` relation plus its participants
/// and most recent message.
///
/// Participants are fixed at creation; there is no add/remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<Message>,
    pub participants: Vec<String>,
}

impl Chat {
    /// Create a Chat from a backend row.
    ///
    /// Embedded `participants` (`[{ "user_id": .. }]` or plain ids) and an
    /// embedded `last_message` (object or single-element array) are read when
    /// present.
    pub fn from_server_map(map: &Value) -> LcResult<Self> {
        let participants = map
            .get("participants")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|p| match p {
                        Value::String(id) => Some(id.clone()),
                        other => str_field(other, "user_id"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let last_message = match map.get("last_message") {
            Some(Value::Array(items)) => items.first().map(Message::from_server_map).transpose()?,
            Some(v @ Value::Object(_)) => Some(Message::from_server_map(v)?),
            _ => None,
        };

        Ok(Self {
            id: required_str(map, "id", "chat")?,
            name: str_field(map, "name").filter(|n| !n.is_empty()),
            is_group: map.get("is_group").and_then(|v| v.as_bool()).unwrap_or(false),
            created_at: time_field(map, "created_at"),
            last_message,
            participants,
        })
    }

    /// Row inserted into `chats`. Id and timestamp come from the backend.
    pub fn insert_row(name: Option<&str>, is_group: bool) -> Value {
        json!({ "name": name, "is_group": is_group })
    }

    /// Row inserted into `chat_participants`.
    pub fn participant_row(chat_id: &str, user_id: &str) -> Value {
        json!({ "chat_id": chat_id, "user_id": user_id })
    }

    /// Time of the most recent activity: last message, or creation.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(self.created_at)
    }

    /// Exactly two participants and not flagged as a group.
    pub fn is_one_to_one(&self) -> bool {
        !self.is_group && self.participants.len() == 2
    }

    /// The other participant of a one-to-one chat.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if !self.is_one_to_one() {
            return None;
        }
        self.participants
            .iter()
            .map(String::as_str)
            .find(|p| *p != user_id)
    }
}

/// Sort chats by most recent activity, newest first.
pub fn sort_by_activity(chats: &mut [Chat]) {
    chats.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
}
