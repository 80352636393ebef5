//! Redis pub/sub bridge for multi-instance deployments.
//!
//! Every instance publishes realtime payloads to `conversation:<uuid>` and
//! `user:<uuid>` channels and runs one pattern-subscriber that routes
//! received payloads into its local [`ConnectionRegistry`]. An instance also
//! receives its own publications; the resulting duplicate toward locally
//! connected clients is accepted, clients dedup by message id.

use axum::extract::ws::Message;
use futures_util::StreamExt;
use redis::{AsyncCommands, Client};
use uuid::Uuid;

use crate::websocket::ConnectionRegistry;

pub fn channel_for_conversation(id: Uuid) -> String {
    format!("conversation:{}", id)
}

pub fn channel_for_user(id: Uuid) -> String {
    format!("user:{}", id)
}

pub async fn publish(client: &Client, channel: &str, payload: &str) -> redis::RedisResult<()> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    conn.publish::<_, _, ()>(channel, payload).await
}

pub async fn start_psub_listener(
    client: Client,
    registry: ConnectionRegistry,
) -> redis::RedisResult<()> {
    // PubSub requires a dedicated connection, not multiplexed
    let conn = client.get_async_connection().await?;
    let mut pubsub = conn.into_pubsub();
    pubsub.psubscribe("conversation:*").await?;
    pubsub.psubscribe("user:*").await?;
    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel: String = msg.get_channel_name().into();
        let payload: String = msg.get_payload()?;
        if let Some(rest) = channel.strip_prefix("conversation:") {
            if let Ok(id) = Uuid::parse_str(rest) {
                registry
                    .broadcast_to_room(id, Message::Text(payload))
                    .await;
            }
        } else if let Some(rest) = channel.strip_prefix("user:") {
            if let Ok(id) = Uuid::parse_str(rest) {
                registry.emit_to_user(id, Message::Text(payload)).await;
            }
        }
    }
    Ok(())
}
