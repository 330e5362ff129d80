//! End-to-end flow: two users, a chat, live delivery, view state, and
//! notifications over the in-process backend.

mod common;

use lc_core::config::AppConfig;
use lc_models::{MediaAttachment, MessageStatus};
use lc_services::{ChatListState, ChatRoomState};

use common::*;

#[tokio::test]
async fn test_live_message_updates_views_and_notifies() {
    let (registry, notifier, _dir) = create_test_registry(AppConfig::default()).await;
    registry.init_all().await.unwrap();

    seed_user(registry.backend.as_ref(), "ana", "Ana", "+573001110000").await;
    seed_user(registry.backend.as_ref(), "luis", "Luis", "+573002220000").await;

    let messaging = &registry.messaging;
    let chat = messaging
        .create_chat(&["ana".to_string(), "luis".to_string()], None, None)
        .await
        .unwrap();

    let mut list = ChatListState::new(messaging.list_chats("ana").await.unwrap());
    let mut room = ChatRoomState::new(chat.id.clone(), messaging.list_messages(&chat.id).await.unwrap());
    assert_eq!(list.len(), 1);
    assert!(room.messages().is_empty());

    assert_eq!(messaging.subscribe_to_user_chats("ana").await.unwrap(), 1);
    let (_handle, mut rx) = collect_messages(messaging);

    messaging.send_message(&chat.id, "¿Almorzamos?", "luis").await.unwrap();
    let media = MediaAttachment::new("file:///tmp/menu.jpg", "image/jpeg", "menu.jpg", 5120);
    messaging.send_media_message(&chat.id, "luis", &media).await.unwrap();

    for _ in 0..2 {
        let incoming = next_message(&mut rx).await.expect("live message");
        assert!(list.apply_message(incoming.clone()));
        assert!(room.push(incoming.clone()));
        assert!(registry
            .notifications
            .show_for_message(&chat, &incoming, "ana")
            .unwrap());
    }

    let shown = notifier.shown();
    assert_eq!(shown.len(), 2);
    assert_eq!(shown[0].title, "New message");
    assert_eq!(shown[0].body, "¿Almorzamos?");
    assert_eq!(shown[1].body, "[image] menu.jpg");

    assert_eq!(
        list.get(&chat.id).unwrap().last_message.as_ref().unwrap().preview(),
        "[image] menu.jpg"
    );
    assert_eq!(room.unread_from_others("ana").len(), 2);
    assert_eq!(messaging.mark_room_read(&mut room, "ana").await.unwrap(), 2);

    let stored = messaging.list_messages(&chat.id).await.unwrap();
    assert!(stored.iter().all(|m| m.status == MessageStatus::Read));

    registry.shutdown_all().await.unwrap();
    assert!(messaging.active_subscriptions().await.is_empty());
}

#[tokio::test]
async fn test_own_messages_are_not_notified() {
    let (registry, notifier, _dir) = create_test_registry(AppConfig::default()).await;
    registry.init_all().await.unwrap();

    let chat = registry
        .messaging
        .create_chat(
            &["ana".to_string(), "luis".to_string(), "sofia".to_string()],
            None,
            None,
        )
        .await
        .unwrap();
    let mine = registry.messaging.send_message(&chat.id, "hola a todos", "ana").await.unwrap();
    let theirs = registry.messaging.send_message(&chat.id, "¡hola!", "sofia").await.unwrap();

    assert!(!registry.notifications.show_for_message(&chat, &mine, "ana").unwrap());
    assert!(registry.notifications.show_for_message(&chat, &theirs, "ana").unwrap());
    assert_eq!(notifier.shown()[0].title, "Group");
}

#[tokio::test]
async fn test_contacts_round_trip_through_registry() {
    let (registry, _notifier, _dir) = create_test_registry(AppConfig::default()).await;
    seed_user(registry.backend.as_ref(), "ana", "Ana", "+573001110000").await;
    seed_user(registry.backend.as_ref(), "luis", "Luis", "+573002220000").await;

    let found = registry.contacts.search_users_by_phone("3002").await.unwrap();
    assert_eq!(found.len(), 1);

    let contact = registry.contacts.add_contact("ana", &found[0].id).await.unwrap();
    assert_eq!(contact.contact_id, "luis");
    assert_eq!(contact.name, "Luis");

    let listed = registry.contacts.list_contacts("ana").await.unwrap();
    assert_eq!(listed, vec![contact]);
}
