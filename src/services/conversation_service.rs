//! Conversation resolution and inbox queries.
//!
//! Every client-supplied conversation reference funnels through
//! [`ConversationService::resolve`], which returns the one canonical id for
//! that reference. Duplicate suppression for direct conversations is the
//! database's job: the pair is stored sorted and covered by partial unique
//! indexes, so concurrent creates race safely and losers re-fetch the winner.

use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::conversation::{ConversationKind, ConversationRef, ConversationSummary};
use crate::services::content_guard::{ContentGuard, Envelope};

const PREVIEW_CHARS: usize = 140;

pub struct ConversationService;

impl ConversationService {
    /// Map a parsed reference to a canonical conversation id.
    ///
    /// Canonical ids are validated for existence and membership; both
    /// failures surface as NotFound so callers cannot probe for foreign
    /// conversations. Ephemeral handles and pair refs find or create the
    /// direct conversation.
    pub async fn resolve(
        db: &Pool<Postgres>,
        caller: Uuid,
        conv_ref: &ConversationRef,
    ) -> Result<Uuid, AppError> {
        match conv_ref {
            ConversationRef::Canonical(id) => {
                if Self::is_participant(db, *id, caller).await? {
                    Ok(*id)
                } else {
                    Err(AppError::NotFound)
                }
            }
            ConversationRef::Ephemeral(handle) => {
                if handle.target_user_id == caller {
                    return Err(AppError::BadRequest(
                        "cannot start a conversation with yourself".into(),
                    ));
                }
                Self::get_or_create_direct(db, caller, handle.target_user_id, None).await
            }
            ConversationRef::Pair {
                other_user_id,
                listing_id,
            } => {
                if *other_user_id == caller {
                    return Err(AppError::BadRequest(
                        "cannot start a conversation with yourself".into(),
                    ));
                }
                Self::get_or_create_direct(db, caller, *other_user_id, *listing_id).await
            }
        }
    }

    pub async fn is_participant(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        let rec = sqlx::query(
            "SELECT 1 FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2 LIMIT 1",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?;
        Ok(rec.is_some())
    }

    /// Find the direct conversation for a pair (and listing context), or
    /// create it. A lost insert race is recovered by re-fetching the row the
    /// winner committed; callers never see the conflict.
    pub async fn get_or_create_direct(
        db: &Pool<Postgres>,
        a: Uuid,
        b: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Uuid, AppError> {
        let (low, high) = sorted_pair(a, b);
        if let Some(id) = Self::find_direct(db, low, high, listing_id).await? {
            return Ok(id);
        }
        match Self::create_direct(db, low, high, listing_id).await {
            Ok(id) => Ok(id),
            Err(AppError::Database(sqlx::Error::Database(ref db_err)))
                if db_err.is_unique_violation() =>
            {
                Self::find_direct(db, low, high, listing_id)
                    .await?
                    .ok_or(AppError::Internal)
            }
            Err(e) => Err(e),
        }
    }

    async fn find_direct(
        db: &Pool<Postgres>,
        low: Uuid,
        high: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Option<Uuid>, AppError> {
        let row = match listing_id {
            Some(listing) => {
                sqlx::query(
                    "SELECT id FROM conversations \
                     WHERE kind = 'direct' AND user_low = $1 AND user_high = $2 AND listing_id = $3",
                )
                .bind(low)
                .bind(high)
                .bind(listing)
                .fetch_optional(db)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id FROM conversations \
                     WHERE kind = 'direct' AND user_low = $1 AND user_high = $2 AND listing_id IS NULL",
                )
                .bind(low)
                .bind(high)
                .fetch_optional(db)
                .await?
            }
        };
        Ok(row.map(|r| r.get("id")))
    }

    /// Most recent direct conversation with the pair, any listing context.
    /// Used by the read path, which never creates.
    pub async fn find_direct_any(
        db: &Pool<Postgres>,
        a: Uuid,
        b: Uuid,
    ) -> Result<Option<Uuid>, AppError> {
        let (low, high) = sorted_pair(a, b);
        let row = sqlx::query(
            "SELECT id FROM conversations \
             WHERE kind = 'direct' AND user_low = $1 AND user_high = $2 \
             ORDER BY COALESCE(last_message_at, created_at) DESC LIMIT 1",
        )
        .bind(low)
        .bind(high)
        .fetch_optional(db)
        .await?;
        Ok(row.map(|r| r.get("id")))
    }

    async fn create_direct(
        db: &Pool<Postgres>,
        low: Uuid,
        high: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        let mut tx = db.begin().await?;
        sqlx::query(
            "INSERT INTO conversations (id, kind, listing_id, user_low, user_high) \
             VALUES ($1, 'direct', $2, $3, $4)",
        )
        .bind(id)
        .bind(listing_id)
        .bind(low)
        .bind(high)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id, role) \
             VALUES ($1, $2, 'member'), ($1, $3, 'member') ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(low)
        .bind(high)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::info!(conversation_id = %id, "direct conversation created");
        Ok(id)
    }

    /// Participants other than `user_id`; the recipient set for fan-out.
    pub async fn other_participants(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows = sqlx::query(
            "SELECT user_id FROM conversation_participants \
             WHERE conversation_id = $1 AND user_id <> $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("user_id")).collect())
    }

    /// Inbox: every conversation the user participates in, most recent
    /// first, with unread counts and a decrypted preview of the last message.
    pub async fn list_for_user(
        db: &Pool<Postgres>,
        guard: &ContentGuard,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.kind, c.title, c.listing_id, c.user_low, c.user_high,
                   c.last_message_at, c.created_at, c.updated_at,
                   (SELECT COUNT(*) FROM messages m
                     WHERE m.conversation_id = c.id AND m.sender_id <> $1 AND m.status <> 'read'
                   ) AS unread_count,
                   last_msg.content AS last_content,
                   last_msg.is_encrypted AS last_is_encrypted,
                   last_msg.content_iv AS last_iv,
                   last_msg.content_tag AS last_tag
            FROM conversations c
            JOIN conversation_participants p ON p.conversation_id = c.id
            LEFT JOIN LATERAL (
                SELECT m.content, m.is_encrypted, m.content_iv, m.content_tag
                FROM messages m
                WHERE m.conversation_id = c.id
                ORDER BY m.created_at DESC
                LIMIT 1
            ) last_msg ON TRUE
            WHERE p.user_id = $1
            ORDER BY COALESCE(c.last_message_at, c.created_at) DESC
            LIMIT 100
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;

        let summaries = rows
            .into_iter()
            .map(|row| Self::summary_from_row(guard, user_id, &row))
            .collect();
        Ok(summaries)
    }

    /// One conversation in the same shape the inbox uses.
    pub async fn summary_for_user(
        db: &Pool<Postgres>,
        guard: &ContentGuard,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<ConversationSummary>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT c.id, c.kind, c.title, c.listing_id, c.user_low, c.user_high,
                   c.last_message_at, c.created_at, c.updated_at,
                   (SELECT COUNT(*) FROM messages m
                     WHERE m.conversation_id = c.id AND m.sender_id <> $1 AND m.status <> 'read'
                   ) AS unread_count,
                   last_msg.content AS last_content,
                   last_msg.is_encrypted AS last_is_encrypted,
                   last_msg.content_iv AS last_iv,
                   last_msg.content_tag AS last_tag
            FROM conversations c
            LEFT JOIN LATERAL (
                SELECT m.content, m.is_encrypted, m.content_iv, m.content_tag
                FROM messages m
                WHERE m.conversation_id = c.id
                ORDER BY m.created_at DESC
                LIMIT 1
            ) last_msg ON TRUE
            WHERE c.id = $2
            "#,
        )
        .bind(user_id)
        .bind(conversation_id)
        .fetch_optional(db)
        .await?;

        Ok(row.map(|r| Self::summary_from_row(guard, user_id, &r)))
    }

    fn summary_from_row(
        guard: &ContentGuard,
        user_id: Uuid,
        row: &sqlx::postgres::PgRow,
    ) -> ConversationSummary {
        let user_low: Option<Uuid> = row.get("user_low");
        let user_high: Option<Uuid> = row.get("user_high");
        let other_user_id = match (user_low, user_high) {
            (Some(low), Some(high)) if low == user_id => Some(high),
            (Some(low), Some(high)) if high == user_id => Some(low),
            _ => None,
        };

        let last_message = row
            .get::<Option<String>, _>("last_content")
            .map(|content| {
                let is_encrypted: Option<bool> = row.get("last_is_encrypted");
                let envelope = match (
                    row.get::<Option<String>, _>("last_iv"),
                    row.get::<Option<String>, _>("last_tag"),
                ) {
                    (Some(iv), Some(tag)) if is_encrypted.unwrap_or(false) => {
                        Some(Envelope { iv, tag })
                    }
                    _ => None,
                };
                preview(&guard.reveal(&content, envelope.as_ref()))
            });

        ConversationSummary {
            id: row.get("id"),
            kind: ConversationKind::parse(row.get::<String, _>("kind").as_str()),
            title: row.get("title"),
            listing_id: row.get("listing_id"),
            other_user_id,
            last_message,
            last_message_at: row.get("last_message_at"),
            unread_count: row.get::<i64, _>("unread_count"),
        }
    }

    /// Unread total across all of the user's conversations.
    pub async fn unread_total(db: &Pool<Postgres>, user_id: Uuid) -> Result<i64, AppError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m \
             JOIN conversation_participants p ON p.conversation_id = m.conversation_id \
             WHERE p.user_id = $1 AND m.sender_id <> $1 AND m.status <> 'read'",
        )
        .bind(user_id)
        .fetch_one(db)
        .await?;
        Ok(total)
    }

    /// Delete a conversation; messages and participant rows cascade.
    pub async fn delete(db: &Pool<Postgres>, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        tracing::info!(conversation_id = %id, "conversation deleted");
        Ok(())
    }
}

pub(crate) fn sorted_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        content.to_string()
    } else {
        content.chars().take(PREVIEW_CHARS).collect()
    }
}
