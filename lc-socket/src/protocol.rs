//! Phoenix channel wire format spoken by the realtime service.
//!
//! Every frame is a JSON object `{topic, event, payload, ref}`. Channel
//! topics on the wire carry a `realtime:` prefix; the prefix is stripped
//! before events reach the router.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use lc_core::error::{LcError, LcResult};

use crate::events::{ChangeEvent, ChangeKind, ChannelSpec};

/// Prefix added to channel topics on the wire.
pub const TOPIC_PREFIX: &str = "realtime:";

/// Topic used for heartbeats.
pub const PHOENIX_TOPIC: &str = "phoenix";

pub mod events {
    pub const JOIN: &str = "phx_join";
    pub const LEAVE: &str = "phx_leave";
    pub const REPLY: &str = "phx_reply";
    pub const ERROR: &str = "phx_error";
    pub const CLOSE: &str = "phx_close";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
    pub const SYSTEM: &str = "system";
}

/// One Phoenix frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    pub fn encode(&self) -> LcResult<String> {
        serde_json::to_string(self).map_err(|e| LcError::Realtime(format!("encode frame: {e}")))
    }

    pub fn decode(text: &str) -> LcResult<Self> {
        serde_json::from_str(text).map_err(|e| LcError::Realtime(format!("decode frame: {e}")))
    }

    /// Channel topic without the wire prefix.
    pub fn channel_topic(&self) -> &str {
        self.topic.strip_prefix(TOPIC_PREFIX).unwrap_or(&self.topic)
    }

    /// Whether this is a `phx_reply` with a non-ok status.
    pub fn is_error_reply(&self) -> bool {
        self.event == events::REPLY
            && self.payload.get("status").and_then(|s| s.as_str()) != Some("ok")
    }
}

/// Wire topic for a channel.
pub fn wire_topic(topic: &str) -> String {
    format!("{TOPIC_PREFIX}{topic}")
}

/// Build the join frame for a channel spec.
pub fn join(spec: &ChannelSpec, reference: u64, access_token: Option<&str>) -> Frame {
    let mut change = json!({
        "event": spec.event.as_str(),
        "schema": spec.schema,
        "table": spec.table,
    });
    if let Some(filter) = spec.filter_string() {
        change["filter"] = Value::String(filter);
    }

    let mut payload = json!({
        "config": {
            "broadcast": { "ack": false, "self": false },
            "presence": { "key": "" },
            "postgres_changes": [change],
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }

    Frame {
        topic: wire_topic(&spec.topic),
        event: events::JOIN.to_string(),
        payload,
        reference: Some(reference.to_string()),
    }
}

/// Build the leave frame for a channel topic.
pub fn leave(topic: &str, reference: u64) -> Frame {
    Frame {
        topic: wire_topic(topic),
        event: events::LEAVE.to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Build a heartbeat frame.
pub fn heartbeat(reference: u64) -> Frame {
    Frame {
        topic: PHOENIX_TOPIC.to_string(),
        event: events::HEARTBEAT.to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Build a frame pushing a new access token to a joined channel.
pub fn access_token(topic: &str, token: &str, reference: u64) -> Frame {
    Frame {
        topic: wire_topic(topic),
        event: events::ACCESS_TOKEN.to_string(),
        payload: json!({ "access_token": token }),
        reference: Some(reference.to_string()),
    }
}

/// Decode a `postgres_changes` frame into a change event.
///
/// Returns `None` for any other frame.
pub fn parse_change(frame: &Frame) -> Option<ChangeEvent> {
    if frame.event != events::POSTGRES_CHANGES {
        return None;
    }
    let data = frame.payload.get("data")?;
    let kind = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(|v| v.as_str())
        .and_then(ChangeKind::parse)?;

    Some(ChangeEvent {
        kind,
        schema: data
            .get("schema")
            .and_then(|v| v.as_str())
            .unwrap_or("public")
            .to_string(),
        table: data.get("table").and_then(|v| v.as_str())?.to_string(),
        record: data.get("record").cloned().unwrap_or_else(|| json!({})),
        old_record: data.get("old_record").cloned().filter(|v| !v.is_null()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_frame_shape() {
        let spec = ChannelSpec::new("chat:c1", "messages")
            .on(ChangeKind::Insert)
            .filter_eq("chat_id", "c1");
        let frame = join(&spec, 7, Some("jwt"));

        assert_eq!(frame.topic, "realtime:chat:c1");
        assert_eq!(frame.event, "phx_join");
        assert_eq!(frame.reference.as_deref(), Some("7"));
        let change = &frame.payload["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "INSERT");
        assert_eq!(change["table"], "messages");
        assert_eq!(change["filter"], "chat_id=eq.c1");
        assert_eq!(frame.payload["access_token"], "jwt");
    }

    #[test]
    fn test_frame_encode_uses_ref_key() {
        let text = heartbeat(3).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["ref"], "3");
        assert_eq!(value["topic"], "phoenix");
    }

    #[test]
    fn test_parse_change() {
        let frame = Frame::decode(
            r#"{
                "topic": "realtime:chat:c1",
                "event": "postgres_changes",
                "payload": {
                    "data": {
                        "type": "INSERT",
                        "schema": "public",
                        "table": "messages",
                        "record": {"id": "m1", "chat_id": "c1"},
                        "old_record": null,
                        "commit_timestamp": "2024-05-01T12:00:00Z"
                    },
                    "ids": [12]
                },
                "ref": null
            }"#,
        )
        .unwrap();

        assert_eq!(frame.channel_topic(), "chat:c1");
        let change = parse_change(&frame).unwrap();
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.record["id"], "m1");
        assert!(change.old_record.is_none());
    }

    #[test]
    fn test_parse_change_ignores_other_events() {
        let frame = heartbeat(1);
        assert!(parse_change(&frame).is_none());
    }

    #[test]
    fn test_error_reply_detection() {
        let ok = Frame {
            topic: "realtime:chat:c1".into(),
            event: "phx_reply".into(),
            payload: json!({"status": "ok", "response": {}}),
            reference: Some("1".into()),
        };
        let mut bad = ok.clone();
        bad.payload = json!({"status": "error", "response": {"reason": "unauthorized"}});
        assert!(!ok.is_error_reply());
        assert!(bad.is_error_reply());
    }
}
