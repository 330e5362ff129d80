//! Messaging service: chats, messages, live subscriptions, and listeners.
//!
//! Each subscribed chat has one realtime channel on the `messages` relation
//! filtered by `chat_id`, drained by a delivery task. Every decoded message
//! is handed to each registered listener in registration order. A listener
//! that fails or panics is logged and skipped; the rest still run.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use lc_api::{Query, SharedBackend};
use lc_core::config::StatusPolicy;
use lc_core::constants::tables;
use lc_core::error::{LcError, LcResult};
use lc_models::models::chat::sort_by_activity;
use lc_models::{Chat, MediaAttachment, Message, MessageStatus};
use lc_socket::{ChangeKind, ChannelSpec, RealtimeChannel};

use crate::event_bus::{AppEvent, EventBus};
use crate::service::{Service, ServiceState, StateCell};
use crate::timeline::ChatRoomState;

/// Callback invoked for every message arriving on a subscribed chat.
pub type MessageListener = Arc<dyn Fn(&Message) -> LcResult<()> + Send + Sync>;

/// Realtime topic for a chat's message feed.
pub fn chat_topic(chat_id: &str) -> String {
    format!("chat:{chat_id}")
}

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, MessageListener)>>,
}

impl Listeners {
    fn add(&self, listener: MessageListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock().push((id, listener));
        id
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    fn snapshot(&self) -> Vec<(u64, MessageListener)> {
        self.lock().clone()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, MessageListener)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Hand `message` to every listener. Returns how many accepted it.
fn deliver(listeners: &Listeners, message: &Message) -> usize {
    let mut delivered = 0;
    for (id, listener) in listeners.snapshot() {
        match panic::catch_unwind(AssertUnwindSafe(|| listener(message))) {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(e)) => warn!(listener = id, message_id = %message.id, "message listener failed: {e}"),
            Err(_) => error!(listener = id, message_id = %message.id, "message listener panicked"),
        }
    }
    delivered
}

/// Registration returned by [`MessagingService::on_message`].
///
/// Dropping the handle removes the registration it stands for and nothing
/// else, so the same closure registered twice needs two disposals.
#[must_use = "dropping the handle removes the listener"]
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<Listeners>,
}

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the registration now.
    pub fn dispose(self) {}
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if listeners.remove(self.id) {
                debug!(listener = self.id, "message listener removed");
            }
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

/// Service for chats, messages, and live message delivery.
pub struct MessagingService {
    state: StateCell,
    backend: SharedBackend,
    event_bus: EventBus,
    status_policy: StatusPolicy,
    listeners: Arc<Listeners>,
    subscriptions: tokio::sync::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl MessagingService {
    pub fn new(backend: SharedBackend, event_bus: EventBus, status_policy: StatusPolicy) -> Self {
        Self {
            state: StateCell::new(),
            backend,
            event_bus,
            status_policy,
            listeners: Arc::new(Listeners::default()),
            subscriptions: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn status_policy(&self) -> StatusPolicy {
        self.status_policy
    }

    // -- Chats --

    /// Chats `user_id` participates in, with participants and last message,
    /// most recently active first.
    pub async fn list_chats(&self, user_id: &str) -> LcResult<Vec<Chat>> {
        let memberships = self
            .backend
            .select(tables::CHAT_PARTICIPANTS, &Query::new().eq("user_id", user_id))
            .await?;
        let chat_ids: Vec<String> = memberships
            .iter()
            .filter_map(|row| row.get("chat_id").and_then(Value::as_str).map(String::from))
            .collect();
        if chat_ids.is_empty() {
            return Ok(Vec::new());
        }

        let chat_rows = self
            .backend
            .select(tables::CHATS, &Query::new().is_in("id", chat_ids.clone()))
            .await?;
        let participants = self.participants_by_chat(&chat_ids).await?;
        let mut latest = self.latest_messages(&chat_ids).await?;

        let mut chats = Vec::with_capacity(chat_rows.len());
        for row in &chat_rows {
            let mut chat = Chat::from_server_map(row)?;
            chat.participants = participants.get(&chat.id).cloned().unwrap_or_default();
            chat.last_message = latest.remove(&chat.id);
            chats.push(chat);
        }
        sort_by_activity(&mut chats);

        debug!(user_id, count = chats.len(), "listed chats");
        Ok(chats)
    }

    async fn participants_by_chat(&self, chat_ids: &[String]) -> LcResult<HashMap<String, Vec<String>>> {
        let rows = self
            .backend
            .select(
                tables::CHAT_PARTICIPANTS,
                &Query::new().is_in("chat_id", chat_ids.to_vec()),
            )
            .await?;
        let mut by_chat: HashMap<String, Vec<String>> = HashMap::new();
        for row in &rows {
            let chat_id = row.get("chat_id").and_then(Value::as_str);
            let user_id = row.get("user_id").and_then(Value::as_str);
            if let (Some(chat_id), Some(user_id)) = (chat_id, user_id) {
                by_chat.entry(chat_id.to_string()).or_default().push(user_id.to_string());
            }
        }
        Ok(by_chat)
    }

    /// Newest message of each chat, one bounded query per chat so a
    /// server-side row cap cannot hide a quiet chat's last message.
    async fn latest_messages(&self, chat_ids: &[String]) -> LcResult<HashMap<String, Message>> {
        let mut latest = HashMap::with_capacity(chat_ids.len());
        for chat_id in chat_ids {
            let row = self
                .backend
                .select_one(
                    tables::MESSAGES,
                    &Query::new()
                        .eq("chat_id", chat_id.as_str())
                        .order_by("created_at", false),
                )
                .await?;
            if let Some(row) = row {
                let message = Message::from_server_map(&row)?;
                latest.insert(chat_id.clone(), message);
            }
        }
        Ok(latest)
    }

    /// Create a chat and one participant row per id.
    ///
    /// The writes are not atomic. If a participant insert fails the chat row
    /// stays behind with fewer participants and the error is returned.
    pub async fn create_chat(
        &self,
        participant_ids: &[String],
        is_group: Option<bool>,
        name: Option<&str>,
    ) -> LcResult<Chat> {
        let is_group = is_group.unwrap_or(participant_ids.len() > 2);
        let name = name.map(str::trim).filter(|n| !n.is_empty());

        let row = self
            .backend
            .insert(tables::CHATS, Chat::insert_row(name, is_group))
            .await?;
        let mut chat = Chat::from_server_map(&row)?;

        for user_id in participant_ids {
            if let Err(e) = self
                .backend
                .insert(tables::CHAT_PARTICIPANTS, Chat::participant_row(&chat.id, user_id))
                .await
            {
                warn!(chat_id = %chat.id, user_id = %user_id, "participant write failed, chat left incomplete: {e}");
                return Err(e);
            }
            chat.participants.push(user_id.clone());
        }

        info!(chat_id = %chat.id, participants = participant_ids.len(), is_group, "chat created");
        self.event_bus.emit(AppEvent::ChatCreated {
            chat_id: chat.id.clone(),
        });
        Ok(chat)
    }

    /// Fetch one chat with its participants and last message.
    pub async fn get_chat(&self, chat_id: &str) -> LcResult<Option<Chat>> {
        let Some(row) = self
            .backend
            .select_one(tables::CHATS, &Query::new().eq("id", chat_id))
            .await?
        else {
            return Ok(None);
        };
        let mut chat = Chat::from_server_map(&row)?;
        chat.participants = self.get_chat_participants(chat_id).await?;
        chat.last_message = self
            .backend
            .select_one(
                tables::MESSAGES,
                &Query::new().eq("chat_id", chat_id).order_by("created_at", false),
            )
            .await?
            .map(|row| Message::from_server_map(&row))
            .transpose()?;
        Ok(Some(chat))
    }

    /// User ids participating in a chat.
    pub async fn get_chat_participants(&self, chat_id: &str) -> LcResult<Vec<String>> {
        let rows = self
            .backend
            .select(tables::CHAT_PARTICIPANTS, &Query::new().eq("chat_id", chat_id))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("user_id").and_then(Value::as_str).map(String::from))
            .collect())
    }

    // -- Messages --

    /// Messages of a chat, oldest first.
    pub async fn list_messages(&self, chat_id: &str) -> LcResult<Vec<Message>> {
        let rows = self
            .backend
            .select(
                tables::MESSAGES,
                &Query::new().eq("chat_id", chat_id).order_by("created_at", true),
            )
            .await?;
        rows.iter().map(Message::from_server_map).collect()
    }

    /// Write a text message. The backend assigns id and timestamp; status
    /// starts at `sent`. The chat row is not touched.
    pub async fn send_message(&self, chat_id: &str, text: &str, sender_id: &str) -> LcResult<Message> {
        let row = self
            .backend
            .insert(tables::MESSAGES, Message::text_row(chat_id, sender_id, text))
            .await?;
        self.sent(row)
    }

    /// Write a message carrying an uploaded file.
    pub async fn send_media_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        media: &MediaAttachment,
    ) -> LcResult<Message> {
        let row = self
            .backend
            .insert(tables::MESSAGES, Message::media_row(chat_id, sender_id, media))
            .await?;
        self.sent(row)
    }

    fn sent(&self, row: Value) -> LcResult<Message> {
        let message = Message::from_server_map(&row)?;
        debug!(message_id = %message.id, chat_id = %message.chat_id, "message sent");
        self.event_bus.emit(AppEvent::MessageSent {
            message_id: message.id.clone(),
            chat_id: message.chat_id.clone(),
        });
        Ok(message)
    }

    /// Set a message's delivery status.
    ///
    /// Under [`StatusPolicy::Arbitrary`] any status replaces any other. Under
    /// [`StatusPolicy::Monotonic`] a change that moves backwards fails with
    /// `InvalidStatusTransition`.
    pub async fn update_message_status(&self, message_id: &str, status: MessageStatus) -> LcResult<Message> {
        let by_id = Query::new().eq("id", message_id);

        if self.status_policy == StatusPolicy::Monotonic {
            let current = self
                .backend
                .select_one(tables::MESSAGES, &by_id)
                .await?
                .ok_or_else(|| LcError::MessageNotFound(message_id.to_string()))?;
            let current = Message::from_server_map(&current)?.status;
            if status < current {
                return Err(LcError::InvalidStatusTransition {
                    from: current.to_string(),
                    to: status.to_string(),
                });
            }
        }

        let rows = self
            .backend
            .update(tables::MESSAGES, &by_id, json!({ "status": status }))
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| LcError::MessageNotFound(message_id.to_string()))?;
        let message = Message::from_server_map(row)?;

        debug!(message_id, status = %status, "message status updated");
        self.event_bus.emit(AppEvent::MessageStatusChanged {
            message_id: message.id.clone(),
            status,
        });
        Ok(message)
    }

    /// Mark every unread message from others in `room` as read.
    pub async fn mark_room_read(&self, room: &mut ChatRoomState, current_user_id: &str) -> LcResult<usize> {
        let unread = room.unread_from_others(current_user_id);
        for id in &unread {
            let updated = self.update_message_status(id, MessageStatus::Read).await?;
            room.apply_status(&updated.id, updated.status);
        }
        Ok(unread.len())
    }

    // -- Subscriptions --

    /// Start live delivery for a chat. Subscribing again is a no-op.
    pub async fn subscribe_to_chat(&self, chat_id: &str) -> LcResult<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(task) = subscriptions.get(chat_id) {
            if !task.is_finished() {
                debug!(chat_id, "already subscribed");
                return Ok(());
            }
        }

        let spec = ChannelSpec::new(chat_topic(chat_id), tables::MESSAGES)
            .on(ChangeKind::Insert)
            .filter_eq("chat_id", chat_id);
        let channel = self.backend.subscribe(spec).await?;
        let task = spawn_delivery(
            chat_id.to_string(),
            channel,
            self.listeners.clone(),
            self.event_bus.clone(),
        );
        subscriptions.insert(chat_id.to_string(), task);
        drop(subscriptions);

        info!(chat_id, "subscribed to chat");
        self.event_bus.emit(AppEvent::SubscriptionChanged {
            chat_id: chat_id.to_string(),
            active: true,
        });
        Ok(())
    }

    /// Subscribe to every chat the user participates in.
    pub async fn subscribe_to_user_chats(&self, user_id: &str) -> LcResult<usize> {
        let chats = self.list_chats(user_id).await?;
        for chat in &chats {
            self.subscribe_to_chat(&chat.id).await?;
        }
        Ok(chats.len())
    }

    /// Stop live delivery for a chat. Returns whether it was subscribed.
    pub async fn unsubscribe_from_chat(&self, chat_id: &str) -> LcResult<bool> {
        let Some(task) = self.subscriptions.lock().await.remove(chat_id) else {
            return Ok(false);
        };
        task.abort();
        // Delivery has already stopped; a channel that fails to close is only logged.
        if let Err(e) = self.backend.unsubscribe(&chat_topic(chat_id)).await {
            warn!(chat_id, "failed to close chat channel: {e}");
        }

        info!(chat_id, "unsubscribed from chat");
        self.event_bus.emit(AppEvent::SubscriptionChanged {
            chat_id: chat_id.to_string(),
            active: false,
        });
        Ok(true)
    }

    pub async fn is_subscribed(&self, chat_id: &str) -> bool {
        self.subscriptions
            .lock()
            .await
            .get(chat_id)
            .is_some_and(|task| !task.is_finished())
    }

    /// Chat ids with an open subscription, sorted.
    pub async fn active_subscriptions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .subscriptions
            .lock()
            .await
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    // -- Listeners --

    /// Register a listener for messages on every subscribed chat.
    pub fn on_message<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&Message) -> LcResult<()> + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(listener))
    }

    /// Register an already shared listener.
    pub fn add_listener(&self, listener: MessageListener) -> ListenerHandle {
        let id = self.listeners.add(listener);
        debug!(listener = id, "message listener registered");
        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Remove the registration behind `handle`.
    pub fn remove_message_listener(&self, handle: ListenerHandle) -> bool {
        let removed = self.listeners.remove(handle.id);
        drop(handle);
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    async fn close_all(&self) {
        let drained: Vec<(String, JoinHandle<()>)> = self.subscriptions.lock().await.drain().collect();
        for (chat_id, task) in drained {
            task.abort();
            if let Err(e) = self.backend.unsubscribe(&chat_topic(&chat_id)).await {
                warn!(chat_id = %chat_id, "failed to close chat channel: {e}");
            }
        }
    }
}

fn spawn_delivery(
    chat_id: String,
    mut channel: RealtimeChannel,
    listeners: Arc<Listeners>,
    event_bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = channel.recv().await {
            if event.kind != ChangeKind::Insert {
                continue;
            }
            let message = match Message::from_server_map(&event.record) {
                Ok(message) => message,
                Err(e) => {
                    warn!(chat_id = %chat_id, "dropping undecodable message: {e}");
                    continue;
                }
            };
            event_bus.emit(AppEvent::MessageReceived {
                message_id: message.id.clone(),
                chat_id: message.chat_id.clone(),
                sender_id: message.sender_id.clone(),
            });
            let delivered = deliver(&listeners, &message);
            debug!(chat_id = %chat_id, message_id = %message.id, delivered, "message delivered");
        }
        debug!(chat_id = %chat_id, "chat channel closed");
    })
}

#[async_trait]
impl Service for MessagingService {
    fn name(&self) -> &str {
        "messaging"
    }

    fn state(&self) -> ServiceState {
        self.state.get()
    }

    async fn init(&self) -> LcResult<()> {
        self.state.set(ServiceState::Running);
        info!(policy = ?self.status_policy, "messaging service initialized");
        Ok(())
    }

    async fn shutdown(&self) -> LcResult<()> {
        self.state.set(ServiceState::ShuttingDown);
        self.close_all().await;
        self.state.set(ServiceState::Stopped);
        info!("messaging service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use lc_api::LocalBackend;
    use lc_core::config::DatabaseConfig;
    use lc_models::Database;
    use tempfile::TempDir;

    fn service(policy: StatusPolicy) -> (MessagingService, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::init(&dir.path().join("test.db"), &DatabaseConfig::default()).unwrap();
        let backend: SharedBackend = Arc::new(LocalBackend::new(db));
        (MessagingService::new(backend, EventBus::new(64), policy), dir)
    }

    fn sample() -> Message {
        Message::from_server_map(&json!({
            "id": "m1", "content": "hola", "sender_id": "u1", "chat_id": "c1",
            "created_at": "2024-01-01T00:00:00Z",
        }))
        .unwrap()
    }

    #[test]
    fn test_deliver_isolates_failures() {
        let listeners = Listeners::default();
        let hits = Arc::new(AtomicUsize::new(0));

        listeners.add(Arc::new(|_: &Message| -> LcResult<()> {
            Err(LcError::Internal("boom".into()))
        }));
        listeners.add(Arc::new(|_: &Message| -> LcResult<()> { panic!("listener bug") }));
        let counter = hits.clone();
        listeners.add(Arc::new(move |_: &Message| -> LcResult<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        assert_eq!(deliver(&listeners, &sample()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_closure_twice_gives_independent_handles() {
        let (svc, _dir) = service(StatusPolicy::Arbitrary);
        let listener: MessageListener = Arc::new(|_: &Message| -> LcResult<()> { Ok(()) });

        let first = svc.add_listener(listener.clone());
        let second = svc.add_listener(listener);
        assert_ne!(first.id(), second.id());
        assert_eq!(svc.listener_count(), 2);

        assert!(svc.remove_message_listener(first));
        assert_eq!(svc.listener_count(), 1);
        second.dispose();
        assert_eq!(svc.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_send_and_list_messages_in_order() {
        let (svc, _dir) = service(StatusPolicy::Arbitrary);
        let first = svc.send_message("c1", "uno", "u1").await.unwrap();
        let second = svc.send_message("c1", "dos", "u2").await.unwrap();
        svc.send_message("c2", "otro", "u1").await.unwrap();

        let listed = svc.list_messages("c1").await.unwrap();
        let ids: Vec<_> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
        assert_eq!(listed[0].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_monotonic_policy_rejects_regression() {
        let (svc, _dir) = service(StatusPolicy::Monotonic);
        let msg = svc.send_message("c1", "hola", "u1").await.unwrap();

        svc.update_message_status(&msg.id, MessageStatus::Read).await.unwrap();
        let err = svc
            .update_message_status(&msg.id, MessageStatus::Sent)
            .await
            .unwrap_err();
        assert!(matches!(err, LcError::InvalidStatusTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_message_status_update() {
        let (svc, _dir) = service(StatusPolicy::Arbitrary);
        let err = svc
            .update_message_status("missing", MessageStatus::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, LcError::MessageNotFound(_)));
    }

    #[tokio::test]
    async fn test_create_chat_defaults_group_flag() {
        let (svc, _dir) = service(StatusPolicy::Arbitrary);
        let ids: Vec<String> = vec!["u1".into(), "u2".into(), "u3".into()];
        let chat = svc.create_chat(&ids, None, Some("  ")).await.unwrap();
        assert!(chat.is_group);
        assert_eq!(chat.name, None);
        assert_eq!(svc.get_chat_participants(&chat.id).await.unwrap(), ids);
    }

    #[tokio::test]
    async fn test_shutdown_closes_subscriptions() {
        let (svc, _dir) = service(StatusPolicy::Arbitrary);
        svc.init().await.unwrap();
        svc.subscribe_to_chat("c1").await.unwrap();
        svc.subscribe_to_chat("c2").await.unwrap();
        assert_eq!(svc.active_subscriptions().await, vec!["c1", "c2"]);

        svc.shutdown().await.unwrap();
        assert!(svc.active_subscriptions().await.is_empty());
        assert_eq!(svc.state(), ServiceState::Stopped);
    }
}
