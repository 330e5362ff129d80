//! Typed event bus for intra-service communication.
//!
//! Uses a tokio broadcast channel so services can announce state changes
//! without knowing who listens. The CLI and view state subscribe to it.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use lc_models::MessageStatus;

/// Application-level events emitted by the services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// A verification code was sent to a phone.
    VerificationRequested { phone: String },
    /// A user signed in, registered, or was restored at startup.
    SignedIn { user_id: String },
    /// The current user signed out.
    SignedOut,
    /// The current user's profile changed.
    ProfileUpdated { user_id: String },
    /// A chat and its participants were created.
    ChatCreated { chat_id: String },
    /// A message was written by this client.
    MessageSent { message_id: String, chat_id: String },
    /// A message arrived over a chat subscription.
    MessageReceived {
        message_id: String,
        chat_id: String,
        sender_id: String,
    },
    /// A message's delivery status changed.
    MessageStatusChanged {
        message_id: String,
        status: MessageStatus,
    },
    /// A chat subscription was opened or closed.
    SubscriptionChanged { chat_id: String, active: bool },
    /// A contact was added.
    ContactAdded { user_id: String, contact_id: String },
    /// A contact was removed.
    ContactRemoved { user_id: String, contact_id: String },
}

/// Application-wide event bus backed by a tokio broadcast channel.
///
/// Every subscriber gets every event. Slow subscribers that fall behind
/// receive a `Lagged` error and miss events.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AppEvent>>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Subscribe to receive application events.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: AppEvent) {
        let label = event_label(&event);
        match self.sender.send(event) {
            Ok(count) => debug!("event_bus: emitted {label} to {count} subscriber(s)"),
            Err(_) => debug!("event_bus: no subscribers for {label}"),
        }
    }

    /// Get the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn event_label(event: &AppEvent) -> &'static str {
    match event {
        AppEvent::VerificationRequested { .. } => "VerificationRequested",
        AppEvent::SignedIn { .. } => "SignedIn",
        AppEvent::SignedOut => "SignedOut",
        AppEvent::ProfileUpdated { .. } => "ProfileUpdated",
        AppEvent::ChatCreated { .. } => "ChatCreated",
        AppEvent::MessageSent { .. } => "MessageSent",
        AppEvent::MessageReceived { .. } => "MessageReceived",
        AppEvent::MessageStatusChanged { .. } => "MessageStatusChanged",
        AppEvent::SubscriptionChanged { .. } => "SubscriptionChanged",
        AppEvent::ContactAdded { .. } => "ContactAdded",
        AppEvent::ContactRemoved { .. } => "ContactRemoved",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(AppEvent::ChatCreated {
            chat_id: "chat-1".into(),
        });

        match rx.recv().await.unwrap() {
            AppEvent::ChatCreated { chat_id } => assert_eq!(chat_id, "chat-1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(AppEvent::SignedOut);

        assert_eq!(rx1.recv().await.unwrap(), AppEvent::SignedOut);
        assert_eq!(rx2.recv().await.unwrap(), AppEvent::SignedOut);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(AppEvent::SignedIn { user_id: "u1".into() });
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(event_label(&AppEvent::SignedOut), "SignedOut");
    }
}
