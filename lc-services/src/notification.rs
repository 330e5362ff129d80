//! Notification service for incoming messages.
//!
//! Decides whether a message deserves a notification and what it says, then
//! hands it to a [`Notifier`]. The desktop notifier uses the OS notification
//! daemon; the recording notifier keeps everything in memory for tests and
//! headless runs. There is no deduplication: showing the same message twice
//! produces two notifications.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use lc_core::config::NotificationConfig;
use lc_core::constants::{APP_NAME, DIRECT_NOTIFICATION_TITLE, GROUP_NOTIFICATION_TITLE};
use lc_core::error::{LcError, LcResult};
use lc_models::{Chat, Message};

use crate::service::{Service, ServiceState, StateCell};

/// What a notification shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub chat_id: String,
    pub message_id: String,
}

/// Platform notification surface.
pub trait Notifier: Send + Sync {
    /// Ask for permission to show notifications. Returns whether granted.
    fn request_permission(&self) -> LcResult<bool>;

    fn show(&self, content: &NotificationContent) -> LcResult<()>;

    /// Set the application badge count where the platform has one.
    fn set_badge(&self, count: u32) -> LcResult<()>;
}

/// Desktop notifications through `notify-rust`.
///
/// Desktop platforms do not gate notifications behind a prompt, so
/// permission is always granted. Badges are not supported and only logged.
#[derive(Debug, Default)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn request_permission(&self) -> LcResult<bool> {
        Ok(true)
    }

    fn show(&self, content: &NotificationContent) -> LcResult<()> {
        #[cfg(not(test))]
        {
            notify_rust::Notification::new()
                .summary(&content.title)
                .body(&content.body)
                .appname(APP_NAME)
                .show()
                .map_err(|e| LcError::Notification(e.to_string()))?;
        }

        debug!(chat_id = %content.chat_id, "desktop notification shown");
        Ok(())
    }

    fn set_badge(&self, count: u32) -> LcResult<()> {
        debug!(count, "badge count not supported on desktop");
        Ok(())
    }
}

/// In-memory notifier that records what would have been shown.
#[derive(Debug)]
pub struct RecordingNotifier {
    granted: bool,
    shown: Mutex<Vec<NotificationContent>>,
    badge: AtomicU32,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            granted: true,
            shown: Mutex::new(Vec::new()),
            badge: AtomicU32::new(0),
        }
    }

    /// A notifier whose permission prompt is always declined.
    pub fn denying() -> Self {
        Self {
            granted: false,
            ..Self::new()
        }
    }

    pub fn shown(&self) -> Vec<NotificationContent> {
        self.shown.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn badge(&self) -> u32 {
        self.badge.load(Ordering::SeqCst)
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for RecordingNotifier {
    fn request_permission(&self) -> LcResult<bool> {
        Ok(self.granted)
    }

    fn show(&self, content: &NotificationContent) -> LcResult<()> {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(content.clone());
        Ok(())
    }

    fn set_badge(&self, count: u32) -> LcResult<()> {
        self.badge.store(count, Ordering::SeqCst);
        Ok(())
    }
}

/// Title for a message notification in `chat`.
pub fn notification_title(chat: &Chat) -> String {
    if chat.is_group {
        chat.name
            .clone()
            .unwrap_or_else(|| GROUP_NOTIFICATION_TITLE.to_string())
    } else {
        DIRECT_NOTIFICATION_TITLE.to_string()
    }
}

/// Service for message notifications and the badge count.
pub struct NotificationService {
    state: StateCell,
    notifier: Arc<dyn Notifier>,
    enabled: bool,
    show_preview: bool,
    permitted: AtomicBool,
    badge: AtomicU32,
}

impl NotificationService {
    pub fn new(notifier: Arc<dyn Notifier>, config: &NotificationConfig) -> Self {
        Self {
            state: StateCell::new(),
            notifier,
            enabled: config.enabled,
            show_preview: config.show_preview,
            permitted: AtomicBool::new(false),
            badge: AtomicU32::new(0),
        }
    }

    /// Request notification permission.
    ///
    /// Fails with `Permission` when the user declines. Does nothing when
    /// notifications are disabled in configuration.
    pub fn initialize(&self) -> LcResult<()> {
        if !self.enabled {
            debug!("notifications disabled in configuration");
            return Ok(());
        }
        if !self.notifier.request_permission()? {
            self.permitted.store(false, Ordering::SeqCst);
            return Err(LcError::Permission("notification permission denied".into()));
        }
        self.permitted.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_permitted(&self) -> bool {
        self.permitted.load(Ordering::SeqCst)
    }

    /// Show a notification for an incoming message.
    ///
    /// Messages written by `current_user_id` are skipped. Returns whether a
    /// notification was shown.
    pub fn show_for_message(&self, chat: &Chat, message: &Message, current_user_id: &str) -> LcResult<bool> {
        if !self.enabled || !self.is_permitted() {
            return Ok(false);
        }
        if message.is_from(current_user_id) {
            return Ok(false);
        }

        let body = if self.show_preview {
            message.preview()
        } else {
            String::new()
        };
        let content = NotificationContent {
            title: notification_title(chat),
            body,
            chat_id: chat.id.clone(),
            message_id: message.id.clone(),
        };
        self.notifier.show(&content)?;

        debug!(chat_id = %chat.id, message_id = %message.id, "message notification shown");
        Ok(true)
    }

    pub fn badge_count(&self) -> u32 {
        self.badge.load(Ordering::SeqCst)
    }

    pub fn set_badge_count(&self, count: u32) -> LcResult<()> {
        self.notifier.set_badge(count)?;
        self.badge.store(count, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Service for NotificationService {
    fn name(&self) -> &str {
        "notification"
    }

    fn state(&self) -> ServiceState {
        self.state.get()
    }

    async fn init(&self) -> LcResult<()> {
        self.state.set(ServiceState::Initializing);
        if let Err(e) = self.initialize() {
            self.state.set(ServiceState::Failed);
            return Err(e);
        }
        self.state.set(ServiceState::Running);
        info!("notification service initialized");
        Ok(())
    }

    async fn shutdown(&self) -> LcResult<()> {
        self.state.set(ServiceState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_models::MediaAttachment;
    use serde_json::json;

    fn chat(is_group: bool, name: Option<&str>) -> Chat {
        Chat::from_server_map(&json!({"id": "c1", "is_group": is_group, "name": name})).unwrap()
    }

    fn message(sender: &str) -> Message {
        Message::from_server_map(&json!({
            "id": "m1", "content": "¿Vienes hoy?", "sender_id": sender, "chat_id": "c1",
        }))
        .unwrap()
    }

    fn service(notifier: Arc<RecordingNotifier>) -> NotificationService {
        let svc = NotificationService::new(notifier, &NotificationConfig::default());
        svc.initialize().unwrap();
        svc
    }

    #[test]
    fn test_titles() {
        assert_eq!(notification_title(&chat(true, Some("Familia"))), "Familia");
        assert_eq!(notification_title(&chat(true, None)), "Group");
        assert_eq!(notification_title(&chat(false, Some("ignored"))), "New message");
    }

    #[test]
    fn test_self_authored_messages_are_skipped() {
        let notifier = Arc::new(RecordingNotifier::new());
        let svc = service(notifier.clone());

        assert!(!svc.show_for_message(&chat(false, None), &message("me"), "me").unwrap());
        assert!(svc.show_for_message(&chat(false, None), &message("u2"), "me").unwrap());

        let shown = notifier.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].body, "¿Vienes hoy?");
    }

    #[test]
    fn test_media_body() {
        let notifier = Arc::new(RecordingNotifier::new());
        let svc = service(notifier.clone());
        let mut msg = message("u2");
        msg.media = Some(MediaAttachment::new("file:///x.pdf", "application/pdf", "acta.pdf", 10));

        svc.show_for_message(&chat(true, None), &msg, "me").unwrap();
        assert_eq!(notifier.shown()[0].body, "[document] acta.pdf");
        assert_eq!(notifier.shown()[0].title, "Group");
    }

    #[test]
    fn test_permission_denied() {
        let svc = NotificationService::new(
            Arc::new(RecordingNotifier::denying()),
            &NotificationConfig::default(),
        );
        assert!(matches!(svc.initialize(), Err(LcError::Permission(_))));
        assert!(!svc.show_for_message(&chat(false, None), &message("u2"), "me").unwrap());
    }

    #[test]
    fn test_badge_count() {
        let notifier = Arc::new(RecordingNotifier::new());
        let svc = service(notifier.clone());
        svc.set_badge_count(3).unwrap();
        assert_eq!(svc.badge_count(), 3);
        assert_eq!(notifier.badge(), 3);
    }
}
