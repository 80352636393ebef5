use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Video,
    File,
    Location,
    Bid,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Voice => "voice",
            MessageKind::Video => "video",
            MessageKind::File => "file",
            MessageKind::Location => "location",
            MessageKind::Bid => "bid",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "image" => MessageKind::Image,
            "voice" => MessageKind::Voice,
            "video" => MessageKind::Video,
            "file" => MessageKind::File,
            "location" => MessageKind::Location,
            "bid" => MessageKind::Bid,
            _ => MessageKind::Text,
        }
    }

    /// Kinds that carry an attachment URL.
    pub fn supports_attachment(&self) -> bool {
        matches!(
            self,
            MessageKind::Image | MessageKind::Voice | MessageKind::Video | MessageKind::File
        )
    }
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "delivered" => MessageStatus::Delivered,
            "read" => MessageStatus::Read,
            _ => MessageStatus::Sent,
        }
    }
}

/// Database row. `content` is plaintext unless `is_encrypted`, in which case
/// it holds base64 ciphertext and `content_iv`/`content_tag` carry the rest
/// of the envelope.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: String,
    pub content: String,
    pub is_encrypted: bool,
    pub content_iv: Option<String>,
    pub content_tag: Option<String>,
    pub attachment_url: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// DTO with the given plaintext (already decrypted by the caller).
    pub fn into_dto(self, content: String) -> MessageDto {
        MessageDto {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content,
            kind: MessageKind::parse(&self.kind),
            status: MessageStatus::parse(&self.status),
            attachment_url: self.attachment_url,
            created_at: self.created_at,
        }
    }
}

/// Wire shape for responses and broadcast payloads; content is plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    pub created_at: DateTime<Utc>,
}
