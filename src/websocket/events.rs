//! Realtime event vocabulary.
//!
//! Every broadcast payload is a flat JSON object with a `type` field and an
//! event timestamp; event-specific fields sit beside them. Serialization is
//! centralized here so handlers never build JSON by hand.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageDto;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatEvent {
    /// New message persisted; carries the full decrypted DTO.
    #[serde(rename = "message.new")]
    MessageNew { message: MessageDto },

    /// A participant marked the conversation read.
    #[serde(rename = "message.read")]
    MessageRead {
        conversation_id: Uuid,
        reader_id: Uuid,
        read_at: chrono::DateTime<Utc>,
        count: u64,
    },

    /// The recipient's unread total moved by `delta`.
    #[serde(rename = "unread.count.changed")]
    UnreadCountChanged { user_id: Uuid, delta: i64 },

    /// Typing indicator relay; never persisted.
    #[serde(rename = "typing")]
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
    },
}

impl ChatEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageNew { .. } => "message.new",
            Self::MessageRead { .. } => "message.read",
            Self::UnreadCountChanged { .. } => "unread.count.changed",
            Self::Typing { .. } => "typing",
        }
    }

    pub fn to_payload_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut payload = serde_json::json!({
            "type": self.event_type(),
            "timestamp": Utc::now().to_rfc3339(),
        });

        // Externally tagged enum: unwrap the variant object and splice its
        // fields in next to `type`.
        let event_data = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = event_data {
            for (_variant, inner) in map {
                if let serde_json::Value::Object(fields) = inner {
                    for (key, value) in fields {
                        payload[key] = value;
                    }
                }
            }
        }

        Ok(payload)
    }

    pub fn to_broadcast_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_payload_value()?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("failed to serialize event: {0}")]
    Serialization(String),

    #[error("failed to publish to redis: {0}")]
    Redis(String),
}

/// Events clients may send over an established socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    #[serde(rename = "typing")]
    Typing { conversation_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageKind, MessageStatus};

    #[test]
    fn payload_is_flat_with_type_and_timestamp() {
        let event = ChatEvent::Typing {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };
        let value = event.to_payload_value().unwrap();
        assert_eq!(value["type"], "typing");
        assert!(value["timestamp"].is_string());
        assert!(value["conversation_id"].is_string());
        assert!(value["user_id"].is_string());
        // No nesting under the variant name.
        assert!(value.get("typing").is_none());
    }

    #[test]
    fn message_new_payload_carries_full_dto() {
        let dto = MessageDto {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: "hello".into(),
            kind: MessageKind::Text,
            status: MessageStatus::Sent,
            attachment_url: None,
            created_at: Utc::now(),
        };
        let value = ChatEvent::MessageNew {
            message: dto.clone(),
        }
        .to_payload_value()
        .unwrap();
        assert_eq!(value["type"], "message.new");
        assert_eq!(value["message"]["content"], "hello");
        assert_eq!(value["message"]["id"], dto.id.to_string());
    }

    #[test]
    fn read_receipt_payload_has_count() {
        let value = ChatEvent::MessageRead {
            conversation_id: Uuid::new_v4(),
            reader_id: Uuid::new_v4(),
            read_at: Utc::now(),
            count: 4,
        }
        .to_payload_value()
        .unwrap();
        assert_eq!(value["type"], "message.read");
        assert_eq!(value["count"], 4);
    }

    #[test]
    fn inbound_typing_event_parses() {
        let conversation_id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"typing","conversation_id":"{conversation_id}"}}"#);
        let event: WsInboundEvent = serde_json::from_str(&raw).unwrap();
        match event {
            WsInboundEvent::Typing {
                conversation_id: parsed,
            } => assert_eq!(parsed, conversation_id),
        }
    }

    #[test]
    fn inbound_event_rejects_unknown_type() {
        let raw = r#"{"type":"shutdown","conversation_id":"00000000-0000-0000-0000-000000000000"}"#;
        assert!(serde_json::from_str::<WsInboundEvent>(raw).is_err());
    }
}
