//! LatamChat Services - application logic over the backend.
//!
//! This crate provides the service trait, the service registry that wires
//! everything together, and the concrete services:
//! - Identity (phone verification, registration, sign-in, profile)
//! - Messaging (chats, messages, live chat subscriptions, listeners)
//! - Contacts (saved contacts, phone search)
//! - Notifications (message notifications, badge count)
//! - View state for the chat list and an open chat room
//! - Event bus (typed intra-service communication)

pub mod service;
pub mod registry;
pub mod event_bus;
pub mod identity;
pub mod messaging;
pub mod contacts;
pub mod notification;
pub mod timeline;

// Re-export key types
pub use service::{Service, ServiceState};
pub use registry::ServiceRegistry;
pub use event_bus::{AppEvent, EventBus};
pub use identity::{IdentityService, IdentityState};
pub use messaging::{ListenerHandle, MessageListener, MessagingService};
pub use contacts::ContactsService;
pub use notification::{
    DesktopNotifier, NotificationContent, NotificationService, Notifier, RecordingNotifier,
};
pub use timeline::{ChatListState, ChatRoomState};
