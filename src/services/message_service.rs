//! Message persistence. Encryption happens before rows reach this module;
//! decryption happens on the way out via [`ContentGuard::reveal`], so a
//! corrupt envelope degrades a single message instead of failing the fetch.

use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::message::{Message, MessageDto, MessageKind};
use crate::services::content_guard::{ContentGuard, Envelope};
use crate::services::conversation_service::ConversationService;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, kind, content, is_encrypted, \
                               content_iv, content_tag, attachment_url, status, created_at";

#[derive(Debug)]
pub struct NewMessage<'a> {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: MessageKind,
    /// Stored form: plaintext, or base64 ciphertext when `envelope` is set.
    pub content: &'a str,
    pub envelope: Option<&'a Envelope>,
    pub attachment_url: Option<&'a str>,
}

pub struct MessageService;

impl MessageService {
    /// Persist a message and bump the conversation's recency. Membership is
    /// re-checked here so no write path can skip it.
    pub async fn create(db: &Pool<Postgres>, msg: NewMessage<'_>) -> Result<Message, AppError> {
        if !ConversationService::is_participant(db, msg.conversation_id, msg.sender_id).await? {
            return Err(AppError::Forbidden);
        }

        let id = Uuid::new_v4();
        let mut tx = db.begin().await?;
        let row = sqlx::query_as::<_, Message>(&format!(
            "INSERT INTO messages (id, conversation_id, sender_id, kind, content, \
                                   is_encrypted, content_iv, content_tag, attachment_url, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'sent') \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id)
        .bind(msg.conversation_id)
        .bind(msg.sender_id)
        .bind(msg.kind.as_str())
        .bind(msg.content)
        .bind(msg.envelope.is_some())
        .bind(msg.envelope.map(|e| e.iv.as_str()))
        .bind(msg.envelope.map(|e| e.tag.as_str()))
        .bind(msg.attachment_url)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversations SET last_message_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(msg.conversation_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(row)
    }

    /// Latest `limit` messages of a conversation, decrypted for the
    /// response. Selection is most-recent-first (the DESC LIMIT picks the
    /// newest page); the page itself is returned in chronological order,
    /// the shape chat clients render without re-sorting.
    pub async fn list_recent(
        db: &Pool<Postgres>,
        guard: &ContentGuard,
        conversation_id: Uuid,
        limit: u32,
    ) -> Result<Vec<MessageDto>, AppError> {
        let limit = i64::from(limit.clamp(1, 200));
        let rows = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(db)
        .await?;

        Ok(rows
            .into_iter()
            .rev()
            .map(|m| Self::to_dto(guard, m))
            .collect())
    }

    /// Messages of the direct conversation between two users, if one exists.
    /// Read-only: never creates a conversation for the pair.
    pub async fn list_by_user_pair(
        db: &Pool<Postgres>,
        guard: &ContentGuard,
        a: Uuid,
        b: Uuid,
        limit: u32,
    ) -> Result<(Option<Uuid>, Vec<MessageDto>), AppError> {
        let Some(conversation_id) = ConversationService::find_direct_any(db, a, b).await? else {
            return Ok((None, Vec::new()));
        };
        let messages = Self::list_recent(db, guard, conversation_id, limit).await?;
        Ok((Some(conversation_id), messages))
    }

    /// Mark all incoming unread messages as read in one statement.
    /// Returns how many rows flipped. Membership is re-checked here like in
    /// [`Self::create`]; no caller-side check is trusted.
    pub async fn mark_read(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> Result<u64, AppError> {
        if !ConversationService::is_participant(db, conversation_id, reader_id).await? {
            return Err(AppError::Forbidden);
        }
        let result = sqlx::query(
            "UPDATE messages SET status = 'read' \
             WHERE conversation_id = $1 AND sender_id <> $2 AND status <> 'read'",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Sender-only hard delete.
    pub async fn delete(
        db: &Pool<Postgres>,
        message_id: Uuid,
        requester_id: Uuid,
    ) -> Result<(), AppError> {
        let deleted = sqlx::query("DELETE FROM messages WHERE id = $1 AND sender_id = $2")
            .bind(message_id)
            .bind(requester_id)
            .execute(db)
            .await?;
        if deleted.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM messages WHERE id = $1")
                .bind(message_id)
                .fetch_optional(db)
                .await?;
            return Err(if exists.is_some() {
                AppError::Forbidden
            } else {
                AppError::NotFound
            });
        }
        Ok(())
    }

    /// Substring search across the caller's conversations. Encrypted rows
    /// are excluded by design; their content is opaque to the database.
    pub async fn search(
        db: &Pool<Postgres>,
        guard: &ContentGuard,
        user_id: Uuid,
        term: &str,
        limit: u32,
    ) -> Result<Vec<MessageDto>, AppError> {
        let limit = i64::from(limit.clamp(1, 200));
        let pattern = format!("%{}%", term.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query_as::<_, Message>(&format!(
            "SELECT {} FROM messages m \
             JOIN conversation_participants p ON p.conversation_id = m.conversation_id \
             WHERE p.user_id = $1 AND m.is_encrypted = FALSE AND m.content ILIKE $2 \
             ORDER BY m.created_at DESC LIMIT $3",
            MESSAGE_COLUMNS
                .split(", ")
                .map(|c| format!("m.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(user_id)
        .bind(pattern)
        .bind(limit)
        .fetch_all(db)
        .await?;

        Ok(rows.into_iter().map(|m| Self::to_dto(guard, m)).collect())
    }

    fn to_dto(guard: &ContentGuard, message: Message) -> MessageDto {
        let envelope = match (&message.content_iv, &message.content_tag) {
            (Some(iv), Some(tag)) if message.is_encrypted => Some(Envelope {
                iv: iv.clone(),
                tag: tag.clone(),
            }),
            _ => None,
        };
        let content = guard.reveal(&message.content, envelope.as_ref());
        message.into_dto(content)
    }
}
