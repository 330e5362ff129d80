//! Message model and delivery status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use lc_core::error::{LcError, LcResult};

use super::{required_str, str_field, time_field};

/// Delivery status of a message.
///
/// Ordered so that `Sent < Delivered < Read`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = LcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(LcError::Serialization(format!("unknown message status `{other}`"))),
        }
    }
}

/// Kind of media carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Document => "document",
        }
    }
}

/// Reference to an uploaded file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub uri: String,
    pub mime_type: String,
    pub name: String,
    pub size: u64,
    pub kind: MediaKind,
}

impl MediaAttachment {
    /// Guess the kind from the MIME type.
    pub fn new(uri: impl Into<String>, mime_type: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        let mime_type = mime_type.into();
        let kind = if mime_type.starts_with("image/") {
            MediaKind::Image
        } else {
            MediaKind::Document
        };
        Self {
            uri: uri.into(),
            mime_type,
            name: name.into(),
            size,
            kind,
        }
    }

    /// Short text used where only a line of text fits, e.g. notifications.
    pub fn summary(&self) -> String {
        format!("[{}] {}", self.kind.as_str(), self.name)
    }
}

/// A message in a chat, one row of the `messages` relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub media: Option<MediaAttachment>,
    pub sender_id: String,
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

impl Message {
    /// Create a Message from a backend row.
    ///
    /// A missing or unknown status decodes as `sent`.
    pub fn from_server_map(map: &Value) -> LcResult<Self> {
        let status = str_field(map, "status")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        let media = match map.get("media") {
            Some(Value::Null) | None => None,
            Some(v) => Some(serde_json::from_value(v.clone())?),
        };

        Ok(Self {
            id: required_str(map, "id", "message")?,
            content: str_field(map, "content").unwrap_or_default(),
            media,
            sender_id: required_str(map, "sender_id", "message")?,
            chat_id: required_str(map, "chat_id", "message")?,
            created_at: time_field(map, "created_at"),
            status,
        })
    }

    /// Row inserted for a text message. Id and timestamp come from the backend.
    pub fn text_row(chat_id: &str, sender_id: &str, content: &str) -> Value {
        json!({
            "chat_id": chat_id,
            "sender_id": sender_id,
            "content": content,
            "status": MessageStatus::Sent,
        })
    }

    /// Row inserted for a media message; `content` carries the file name.
    pub fn media_row(chat_id: &str, sender_id: &str, media: &MediaAttachment) -> Value {
        json!({
            "chat_id": chat_id,
            "sender_id": sender_id,
            "content": media.name,
            "media": media,
            "status": MessageStatus::Sent,
        })
    }

    /// Text shown in previews.
    pub fn preview(&self) -> String {
        match &self.media {
            Some(media) => media.summary(),
            None => self.content.clone(),
        }
    }

    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }
}
