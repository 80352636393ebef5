//! Fan-out behavior of the connection registry and broadcaster, without any
//! external transport: subscribers are plain channels.

use axum::extract::ws::Message;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use messaging_service::models::{MessageDto, MessageKind, MessageStatus};
use messaging_service::websocket::broadcast::Broadcaster;
use messaging_service::websocket::ConnectionRegistry;

fn dto(conversation_id: Uuid, sender_id: Uuid, content: &str) -> MessageDto {
    MessageDto {
        id: Uuid::new_v4(),
        conversation_id,
        sender_id,
        content: content.into(),
        kind: MessageKind::Text,
        status: MessageStatus::Sent,
        attachment_url: None,
        created_at: Utc::now(),
    }
}

fn text_payload(msg: Message) -> Value {
    match msg {
        Message::Text(t) => serde_json::from_str(&t).expect("payload is JSON"),
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn room_members_receive_new_messages() {
    let registry = ConnectionRegistry::new();
    let room = Uuid::new_v4();
    let (sender, member) = (Uuid::new_v4(), Uuid::new_v4());

    let mut rx = registry.subscribe(member, Some(room)).await;

    let broadcaster = Broadcaster::new(registry, None);
    broadcaster
        .message_new(&[member], &dto(room, sender, "hello"))
        .await
        .unwrap();

    // Dual delivery: once via the room, once via the user channel.
    let first = text_payload(rx.recv().await.unwrap());
    let second = text_payload(rx.recv().await.unwrap());
    assert_eq!(first["type"], "message.new");
    assert_eq!(first["message"]["content"], "hello");
    assert_eq!(first["message"]["id"], second["message"]["id"]);
}

#[tokio::test]
async fn recipient_without_room_still_gets_user_channel_delivery() {
    let registry = ConnectionRegistry::new();
    let room = Uuid::new_v4();
    let (sender, recipient) = (Uuid::new_v4(), Uuid::new_v4());

    // Recipient connected, but never joined the conversation room.
    let mut rx = registry.subscribe(recipient, None).await;

    let broadcaster = Broadcaster::new(registry, None);
    broadcaster
        .message_new(&[recipient], &dto(room, sender, "you there?"))
        .await
        .unwrap();

    let payload = text_payload(rx.recv().await.unwrap());
    assert_eq!(payload["type"], "message.new");
    assert_eq!(payload["message"]["content"], "you there?");
    // Exactly one copy: nothing else queued.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn broadcasting_to_an_empty_room_is_a_noop() {
    let broadcaster = Broadcaster::new(ConnectionRegistry::new(), None);
    let result = broadcaster
        .message_new(&[], &dto(Uuid::new_v4(), Uuid::new_v4(), "nobody home"))
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn disconnected_subscribers_are_pruned() {
    let registry = ConnectionRegistry::new();
    let room = Uuid::new_v4();
    let member = Uuid::new_v4();

    let rx = registry.subscribe(member, Some(room)).await;
    assert_eq!(registry.room_subscribers(room).await, 1);
    drop(rx);

    registry
        .broadcast_to_room(room, Message::Text("ping".into()))
        .await;
    assert_eq!(registry.room_subscribers(room).await, 0);
}

#[tokio::test]
async fn read_receipts_go_to_the_room_only() {
    let registry = ConnectionRegistry::new();
    let room = Uuid::new_v4();
    let (reader, in_room, outside) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let mut room_rx = registry.subscribe(in_room, Some(room)).await;
    let mut outside_rx = registry.subscribe(outside, None).await;

    let broadcaster = Broadcaster::new(registry, None);
    broadcaster.message_read(room, reader, 3).await.unwrap();

    let payload = text_payload(room_rx.recv().await.unwrap());
    assert_eq!(payload["type"], "message.read");
    assert_eq!(payload["reader_id"], reader.to_string());
    assert_eq!(payload["count"], 3);
    assert!(outside_rx.try_recv().is_err());
}

#[tokio::test]
async fn unread_delta_targets_one_user() {
    let registry = ConnectionRegistry::new();
    let (target, bystander) = (Uuid::new_v4(), Uuid::new_v4());

    let mut target_rx = registry.subscribe(target, None).await;
    let mut bystander_rx = registry.subscribe(bystander, None).await;

    let broadcaster = Broadcaster::new(registry, None);
    broadcaster.unread_count_changed(target, -2).await.unwrap();

    let payload = text_payload(target_rx.recv().await.unwrap());
    assert_eq!(payload["type"], "unread.count.changed");
    assert_eq!(payload["delta"], -2);
    assert!(bystander_rx.try_recv().is_err());
}

#[tokio::test]
async fn room_events_arrive_in_publish_order() {
    let registry = ConnectionRegistry::new();
    let room = Uuid::new_v4();
    let (sender, member) = (Uuid::new_v4(), Uuid::new_v4());

    let mut rx = registry.subscribe(member, Some(room)).await;
    let broadcaster = Broadcaster::new(registry, None);

    for i in 0..5 {
        broadcaster
            .message_new(&[], &dto(room, sender, &format!("msg-{i}")))
            .await
            .unwrap();
    }

    for i in 0..5 {
        let payload = text_payload(rx.recv().await.unwrap());
        assert_eq!(payload["message"]["content"], format!("msg-{i}"));
    }
}
