//! Delivery broadcaster.
//!
//! This is the canonical way to push realtime events. Handlers never call
//! the registry or pubsub directly; they go through a [`Broadcaster`] so
//! local fan-out and cross-instance publication stay in one place.
//!
//! Delivery is best-effort. Persistence is the durability boundary, so a
//! failed broadcast is reported to the caller as a [`BroadcastError`] for
//! logging and must never fail the originating request.

use axum::extract::ws::Message;
use chrono::Utc;
use uuid::Uuid;

use crate::models::MessageDto;
use crate::websocket::events::{BroadcastError, ChatEvent};
use crate::websocket::{pubsub, ConnectionRegistry};

#[derive(Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
    redis: Option<redis::Client>,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry, redis: Option<redis::Client>) -> Self {
        Self { registry, redis }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// New message fan-out: the conversation room, plus every recipient's
    /// private channel. A recipient who has the room open receives the event
    /// twice; clients dedup by message id.
    pub async fn message_new(
        &self,
        recipients: &[Uuid],
        message: &MessageDto,
    ) -> Result<(), BroadcastError> {
        let event = ChatEvent::MessageNew {
            message: message.clone(),
        };
        let payload = event
            .to_broadcast_payload()
            .map_err(|e| BroadcastError::Serialization(e.to_string()))?;

        self.registry
            .broadcast_to_room(message.conversation_id, Message::Text(payload.clone()))
            .await;
        for recipient in recipients {
            self.registry
                .emit_to_user(*recipient, Message::Text(payload.clone()))
                .await;
        }

        self.publish_remote(
            &pubsub::channel_for_conversation(message.conversation_id),
            &payload,
        )
        .await?;
        for recipient in recipients {
            self.publish_remote(&pubsub::channel_for_user(*recipient), &payload)
                .await?;
        }
        Ok(())
    }

    pub async fn message_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        count: u64,
    ) -> Result<(), BroadcastError> {
        let event = ChatEvent::MessageRead {
            conversation_id,
            reader_id,
            read_at: Utc::now(),
            count,
        };
        let payload = event
            .to_broadcast_payload()
            .map_err(|e| BroadcastError::Serialization(e.to_string()))?;

        self.registry
            .broadcast_to_room(conversation_id, Message::Text(payload.clone()))
            .await;
        self.publish_remote(&pubsub::channel_for_conversation(conversation_id), &payload)
            .await
    }

    pub async fn unread_count_changed(
        &self,
        user_id: Uuid,
        delta: i64,
    ) -> Result<(), BroadcastError> {
        let event = ChatEvent::UnreadCountChanged { user_id, delta };
        let payload = event
            .to_broadcast_payload()
            .map_err(|e| BroadcastError::Serialization(e.to_string()))?;

        self.registry
            .emit_to_user(user_id, Message::Text(payload.clone()))
            .await;
        self.publish_remote(&pubsub::channel_for_user(user_id), &payload)
            .await
    }

    pub async fn typing(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), BroadcastError> {
        let event = ChatEvent::Typing {
            conversation_id,
            user_id,
        };
        let payload = event
            .to_broadcast_payload()
            .map_err(|e| BroadcastError::Serialization(e.to_string()))?;

        self.registry
            .broadcast_to_room(conversation_id, Message::Text(payload.clone()))
            .await;
        self.publish_remote(&pubsub::channel_for_conversation(conversation_id), &payload)
            .await
    }

    /// Single-instance deployments run without Redis; remote publication is
    /// then a no-op and local fan-out already happened.
    async fn publish_remote(&self, channel: &str, payload: &str) -> Result<(), BroadcastError> {
        let Some(client) = &self.redis else {
            return Ok(());
        };
        pubsub::publish(client, channel, payload)
            .await
            .map_err(|e| BroadcastError::Redis(e.to_string()))
    }
}
