//! Conversation handlers: inbox, detail, unread total, delete.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::{Participant, User};
use crate::models::ConversationSummary;
use crate::services::conversation_service::ConversationService;
use crate::services::rate_limit::RouteClass;
use crate::state::AppState;

pub async fn list_conversations(
    State(state): State<AppState>,
    user: User,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    state.limiter.admit_user(user.id, RouteClass::Api)?;
    let summaries = ConversationService::list_for_user(&state.db, &state.guard, user.id).await?;
    Ok(Json(summaries))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ConversationSummary>, AppError> {
    state.limiter.admit_user(user.id, RouteClass::Api)?;
    Participant::verify(&state.db, user.id, conversation_id).await?;

    ConversationService::summary_for_user(&state.db, &state.guard, user.id, conversation_id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

#[derive(Debug, Serialize)]
pub struct UnreadTotalResponse {
    pub unread_count: i64,
}

pub async fn unread_total(
    State(state): State<AppState>,
    user: User,
) -> Result<Json<UnreadTotalResponse>, AppError> {
    state.limiter.admit_user(user.id, RouteClass::Api)?;
    let unread_count = ConversationService::unread_total(&state.db, user.id).await?;
    Ok(Json(UnreadTotalResponse { unread_count }))
}

/// Participant-only delete; messages and membership rows cascade.
pub async fn delete_conversation(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.limiter.admit_user(user.id, RouteClass::Api)?;
    Participant::verify(&state.db, user.id, conversation_id).await?;
    ConversationService::delete(&state.db, conversation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
