use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "group" => ConversationKind::Group,
            _ => ConversationKind::Direct,
        }
    }
}

/// Client-issued placeholder for a conversation that does not exist yet:
/// `temp_<target_user_uuid>_<unix_millis>`. Minted client-side when a chat
/// is opened from a listing, replaced by a canonical id on first send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EphemeralHandle {
    pub target_user_id: Uuid,
    pub created_at_ms: i64,
}

impl EphemeralHandle {
    /// Parse `temp_<uuid>_<millis>`. Returns None when the string is not
    /// handle-shaped at all; callers distinguish that from a malformed
    /// handle via [`ConversationRef::parse`].
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("temp_")?;
        // UUIDs never contain '_', so the last segment is the timestamp.
        let (uuid_part, ts_part) = rest.rsplit_once('_')?;
        let target_user_id = Uuid::parse_str(uuid_part).ok()?;
        let created_at_ms = ts_part.parse::<i64>().ok()?;
        Some(Self {
            target_user_id,
            created_at_ms,
        })
    }

    pub fn as_handle_string(&self) -> String {
        format!("temp_{}_{}", self.target_user_id, self.created_at_ms)
    }
}

/// Every way a client may address a conversation, parsed once at the edge.
/// Handlers never branch on raw strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationRef {
    /// Existing conversation addressed by primary key.
    Canonical(Uuid),
    /// `temp_*` placeholder; resolution creates or finds the direct
    /// conversation with the embedded target user.
    Ephemeral(EphemeralHandle),
    /// Addressed by the other participant, optionally scoped to a listing.
    Pair {
        other_user_id: Uuid,
        listing_id: Option<Uuid>,
    },
}

impl ConversationRef {
    /// Build a ref from the request fields. `conversation_id` wins over
    /// `receiver_id`; a string with the `temp_` prefix that fails to parse
    /// is rejected rather than reinterpreted.
    pub fn parse(
        conversation_id: Option<&str>,
        receiver_id: Option<Uuid>,
        listing_id: Option<Uuid>,
    ) -> Result<Self, AppError> {
        if let Some(raw) = conversation_id.map(str::trim).filter(|s| !s.is_empty()) {
            if raw.starts_with("temp_") {
                return EphemeralHandle::parse(raw)
                    .map(ConversationRef::Ephemeral)
                    .ok_or_else(|| {
                        AppError::BadRequest("malformed temporary conversation handle".into())
                    });
            }
            return Uuid::parse_str(raw).map(ConversationRef::Canonical).map_err(|_| {
                AppError::BadRequest("conversation_id must be a UUID or temp handle".into())
            });
        }
        if let Some(other_user_id) = receiver_id {
            return Ok(ConversationRef::Pair {
                other_user_id,
                listing_id,
            });
        }
        Err(AppError::BadRequest(
            "conversation_id or receiver_id required".into(),
        ))
    }

    /// True when resolving this ref may create a conversation.
    pub fn may_create(&self) -> bool {
        !matches!(self, ConversationRef::Canonical(_))
    }
}

/// Inbox entry: conversation plus derived per-viewer fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub kind: ConversationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_handle() {
        let user = Uuid::new_v4();
        let handle = EphemeralHandle::parse(&format!("temp_{}_1716200000000", user)).unwrap();
        assert_eq!(handle.target_user_id, user);
        assert_eq!(handle.created_at_ms, 1_716_200_000_000);
    }

    #[test]
    fn handle_round_trips_through_string() {
        let handle = EphemeralHandle {
            target_user_id: Uuid::new_v4(),
            created_at_ms: 42,
        };
        assert_eq!(
            EphemeralHandle::parse(&handle.as_handle_string()),
            Some(handle)
        );
    }

    #[test]
    fn rejects_handle_without_timestamp() {
        let user = Uuid::new_v4();
        assert!(EphemeralHandle::parse(&format!("temp_{}", user)).is_none());
    }

    #[test]
    fn rejects_handle_with_bad_uuid() {
        assert!(EphemeralHandle::parse("temp_not-a-uuid_1716200000000").is_none());
    }

    #[test]
    fn ref_prefers_conversation_id_over_receiver() {
        let id = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        let r = ConversationRef::parse(Some(&id.to_string()), Some(receiver), None).unwrap();
        assert_eq!(r, ConversationRef::Canonical(id));
    }

    #[test]
    fn ref_malformed_temp_prefix_is_error_not_pair() {
        let receiver = Uuid::new_v4();
        let err = ConversationRef::parse(Some("temp_broken"), Some(receiver), None).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn ref_requires_some_address() {
        let err = ConversationRef::parse(None, None, None).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn ref_falls_back_to_pair() {
        let receiver = Uuid::new_v4();
        let listing = Uuid::new_v4();
        let r = ConversationRef::parse(None, Some(receiver), Some(listing)).unwrap();
        assert_eq!(
            r,
            ConversationRef::Pair {
                other_user_id: receiver,
                listing_id: Some(listing)
            }
        );
        assert!(r.may_create());
    }
}
