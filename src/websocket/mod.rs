use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod broadcast;
pub mod events;
pub mod handlers;
pub mod pubsub;

/// In-process fan-out state: conversation rooms plus per-user channels.
///
/// A connection subscribed to both a room and its own user channel receives
/// room events and user events over one queue; if the same payload goes to
/// both, it arrives twice. Deduplication is the client's job (by message id).
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    // conversation_id -> senders of connections that joined the room
    rooms: Arc<RwLock<HashMap<Uuid, Vec<UnboundedSender<Message>>>>>,
    // user_id -> senders of that user's connections
    users: Arc<RwLock<HashMap<Uuid, Vec<UnboundedSender<Message>>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Always joins the caller's user channel;
    /// additionally joins the room when `conversation_id` is given. Both
    /// subscriptions share one receiver.
    pub async fn subscribe(
        &self,
        user_id: Uuid,
        conversation_id: Option<Uuid>,
    ) -> UnboundedReceiver<Message> {
        let (tx, rx) = unbounded_channel();
        if let Some(cid) = conversation_id {
            self.rooms.write().await.entry(cid).or_default().push(tx.clone());
        }
        self.users.write().await.entry(user_id).or_default().push(tx);
        rx
    }

    /// Deliver to every connection that joined the conversation room.
    /// Senders whose receiver hung up are pruned on the way.
    pub async fn broadcast_to_room(&self, conversation_id: Uuid, msg: Message) {
        let mut guard = self.rooms.write().await;
        if let Some(list) = guard.get_mut(&conversation_id) {
            list.retain(|sender| sender.send(msg.clone()).is_ok());
            if list.is_empty() {
                guard.remove(&conversation_id);
            }
        }
    }

    /// Deliver to every connection of one user, joined room or not.
    pub async fn emit_to_user(&self, user_id: Uuid, msg: Message) {
        let mut guard = self.users.write().await;
        if let Some(list) = guard.get_mut(&user_id) {
            list.retain(|sender| sender.send(msg.clone()).is_ok());
            if list.is_empty() {
                guard.remove(&user_id);
            }
        }
    }

    pub async fn room_subscribers(&self, conversation_id: Uuid) -> usize {
        self.rooms
            .read()
            .await
            .get(&conversation_id)
            .map_or(0, Vec::len)
    }
}
