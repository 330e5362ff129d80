//! Change feed event types and the channel router.
//!
//! A channel is opened from a `ChannelSpec` (table, event kind, optional
//! equality filter) and yields every matching row change until it is closed.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Kind of row change carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Subscribe to all kinds. Never carried by an event.
    #[serde(rename = "*")]
    All,
}

impl ChangeKind {
    /// Parse the wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "*" => Some(Self::All),
            _ => None,
        }
    }

    /// Convert to the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::All => "*",
        }
    }

    /// Whether a subscription for `self` accepts an event of kind `other`.
    pub fn accepts(&self, other: ChangeKind) -> bool {
        *self == ChangeKind::All || *self == other
    }
}

/// A row change pushed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    /// New row for inserts and updates, empty object for deletes.
    pub record: serde_json::Value,
    /// Previous row for updates and deletes when the backend sends it.
    pub old_record: Option<serde_json::Value>,
}

impl ChangeEvent {
    /// Convenience constructor for an insert into `public.<table>`.
    pub fn insert(table: &str, record: serde_json::Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            schema: "public".to_string(),
            table: table.to_string(),
            record,
            old_record: None,
        }
    }

    /// Convenience constructor for an update of a row in `public.<table>`.
    pub fn update(table: &str, record: serde_json::Value, old_record: Option<serde_json::Value>) -> Self {
        Self {
            kind: ChangeKind::Update,
            schema: "public".to_string(),
            table: table.to_string(),
            record,
            old_record,
        }
    }
}

/// What a channel listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Channel name, e.g. `chat:<id>`. Unique per open channel.
    pub topic: String,
    pub schema: String,
    pub table: String,
    pub event: ChangeKind,
    /// Equality filter `(column, value)` on the changed row.
    pub filter: Option<(String, String)>,
}

impl ChannelSpec {
    /// Listen to every change of `public.<table>` on `topic`.
    pub fn new(topic: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            schema: "public".to_string(),
            table: table.into(),
            event: ChangeKind::All,
            filter: None,
        }
    }

    /// Restrict to one kind of change.
    pub fn on(mut self, event: ChangeKind) -> Self {
        self.event = event;
        self
    }

    /// Restrict to rows where `column` equals `value`.
    pub fn filter_eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter = Some((column.into(), value.into()));
        self
    }

    /// Filter in the backend's `column=eq.value` syntax.
    pub fn filter_string(&self) -> Option<String> {
        self.filter
            .as_ref()
            .map(|(column, value)| format!("{column}=eq.{value}"))
    }

    /// Whether an event should be delivered on this channel.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || event.schema != self.schema || !self.event.accepts(event.kind) {
            return false;
        }
        match &self.filter {
            None => true,
            Some((column, value)) => {
                let row = if event.kind == ChangeKind::Delete {
                    event.old_record.as_ref().unwrap_or(&event.record)
                } else {
                    &event.record
                };
                match row.get(column) {
                    Some(serde_json::Value::String(s)) => s == value,
                    Some(other) => other.to_string() == *value,
                    None => false,
                }
            }
        }
    }
}

/// Receiving end of an open channel.
///
/// `recv` returns `None` once the channel is closed by unsubscribe,
/// socket shutdown, or backend teardown.
#[derive(Debug)]
pub struct RealtimeChannel {
    topic: String,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl RealtimeChannel {
    pub fn new(topic: impl Into<String>, receiver: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next change event.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }
}

struct Route {
    spec: ChannelSpec,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

/// Topic-keyed registry of open channels.
///
/// Opening a topic that is already open replaces the previous channel,
/// which then ends.
#[derive(Default)]
pub struct ChannelRouter {
    routes: Mutex<HashMap<String, Route>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Route>> {
        // A panic while holding this lock cannot leave the map half-updated.
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a channel and return its receiving end.
    pub fn open(&self, spec: ChannelSpec) -> RealtimeChannel {
        let (sender, receiver) = mpsc::unbounded_channel();
        let topic = spec.topic.clone();
        if self.lock().insert(topic.clone(), Route { spec, sender }).is_some() {
            warn!("channel {topic} reopened, previous receiver closed");
        }
        RealtimeChannel::new(topic, receiver)
    }

    /// Close a channel. Returns whether it was open.
    pub fn close(&self, topic: &str) -> bool {
        self.lock().remove(topic).is_some()
    }

    /// Close every channel.
    pub fn close_all(&self) {
        self.lock().clear();
    }

    /// Deliver to every open channel whose spec matches. Returns the count.
    pub fn route(&self, event: &ChangeEvent) -> usize {
        let mut routes = self.lock();
        let mut delivered = 0;
        routes.retain(|topic, route| {
            if !route.spec.matches(event) {
                return true;
            }
            match route.sender.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!("channel {topic} receiver dropped, removing route");
                    false
                }
            }
        });
        delivered
    }

    /// Deliver to one topic if its spec matches. Returns whether delivered.
    pub fn route_to(&self, topic: &str, event: ChangeEvent) -> bool {
        let mut routes = self.lock();
        let Some(route) = routes.get(topic) else {
            debug!("event for unknown channel {topic} dropped");
            return false;
        };
        if !route.spec.matches(&event) {
            return false;
        }
        if route.sender.send(event).is_err() {
            routes.remove(topic);
            return false;
        }
        true
    }

    pub fn spec(&self, topic: &str) -> Option<ChannelSpec> {
        self.lock().get(topic).map(|r| r.spec.clone())
    }

    pub fn topics(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Connection state of the realtime socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// Websocket handshake in progress.
    Connecting,
    /// Connected; channels receive events.
    Connected,
    /// The socket closed with an error. Not retried.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat_spec(chat_id: &str) -> ChannelSpec {
        ChannelSpec::new(format!("chat:{chat_id}"), "messages")
            .on(ChangeKind::Insert)
            .filter_eq("chat_id", chat_id)
    }

    #[test]
    fn test_change_kind_parsing() {
        assert_eq!(ChangeKind::parse("INSERT"), Some(ChangeKind::Insert));
        assert_eq!(ChangeKind::parse("*"), Some(ChangeKind::All));
        assert_eq!(ChangeKind::parse("insert"), None);
        assert!(ChangeKind::All.accepts(ChangeKind::Delete));
        assert!(!ChangeKind::Insert.accepts(ChangeKind::Update));
    }

    #[test]
    fn test_spec_matching() {
        let spec = chat_spec("c1");
        assert_eq!(spec.filter_string().as_deref(), Some("chat_id=eq.c1"));

        let hit = ChangeEvent::insert("messages", json!({"chat_id": "c1"}));
        let other_chat = ChangeEvent::insert("messages", json!({"chat_id": "c2"}));
        let other_table = ChangeEvent::insert("chats", json!({"chat_id": "c1"}));
        let update = ChangeEvent::update("messages", json!({"chat_id": "c1"}), None);

        assert!(spec.matches(&hit));
        assert!(!spec.matches(&other_chat));
        assert!(!spec.matches(&other_table));
        assert!(!spec.matches(&update));
    }

    #[test]
    fn test_numeric_filter_values() {
        let spec = ChannelSpec::new("t", "messages").filter_eq("chat_id", "42");
        assert!(spec.matches(&ChangeEvent::insert("messages", json!({"chat_id": 42}))));
    }

    #[tokio::test]
    async fn test_router_delivers_to_matching_channels() {
        let router = ChannelRouter::new();
        let mut c1 = router.open(chat_spec("c1"));
        let mut c2 = router.open(chat_spec("c2"));

        let delivered = router.route(&ChangeEvent::insert("messages", json!({"chat_id": "c1", "id": "m1"})));
        assert_eq!(delivered, 1);

        let event = c1.recv().await.unwrap();
        assert_eq!(event.record["id"], "m1");
        assert!(c2.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_ends_channel() {
        let router = ChannelRouter::new();
        let mut channel = router.open(chat_spec("c1"));
        assert_eq!(router.len(), 1);
        assert!(router.close("chat:c1"));
        assert!(!router.close("chat:c1"));
        assert!(channel.recv().await.is_none());
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let router = ChannelRouter::new();
        drop(router.open(chat_spec("c1")));
        router.route(&ChangeEvent::insert("messages", json!({"chat_id": "c1"})));
        assert!(router.is_empty());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
    }
}
