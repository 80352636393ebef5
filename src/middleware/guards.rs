//! Authorization guards that enforce permission checks at the type level
//! This prevents handlers from accidentally bypassing authorization

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

/// Authenticated caller, extracted from the verified id the auth middleware
/// placed in request extensions.
#[derive(Debug, Clone, Copy)]
pub struct User {
    pub id: Uuid,
}

impl User {
    /// Client-supplied sender/requester ids are never trusted on their own;
    /// they must match the authenticated caller.
    pub fn require_self(&self, claimed: Uuid) -> Result<(), AppError> {
        if self.id != claimed {
            return Err(AppError::Forbidden);
        }
        Ok(())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for User
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .ok_or(AppError::Unauthorized)?;

        Ok(User { id: user_id })
    }
}

/// Verified conversation membership for a directly addressed conversation.
///
/// A missing conversation is `NotFound`; an existing conversation the caller
/// does not belong to is `Forbidden`.
#[derive(Debug, Clone, Copy)]
pub struct Participant {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
}

impl Participant {
    pub async fn verify(
        db: &PgPool,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Self, AppError> {
        let record = sqlx::query_as::<_, MembershipRecord>(
            r#"
            SELECT
                EXISTS(
                    SELECT 1 FROM conversations WHERE id = $1
                ) AS conversation_exists,
                EXISTS(
                    SELECT 1 FROM conversation_participants
                    WHERE conversation_id = $1 AND user_id = $2
                ) AS is_participant
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(db)
        .await?;

        if !record.conversation_exists {
            return Err(AppError::NotFound);
        }
        if !record.is_participant {
            return Err(AppError::Forbidden);
        }

        Ok(Participant {
            user_id,
            conversation_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MembershipRecord {
    conversation_exists: bool,
    is_participant: bool,
}
