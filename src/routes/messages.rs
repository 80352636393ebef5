//! Message handlers: send, fetch, mark-read, delete, upload-attachment.
//!
//! Every handler follows the same discipline: the verified caller comes from
//! the auth middleware, any client-supplied sender id must match it, the rate
//! limiter runs before anything touches storage, and broadcast failures are
//! logged after the row is committed, never surfaced to the sender.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::{Participant, User};
use crate::models::{ConversationRef, MessageDto, MessageKind};
use crate::services::conversation_service::ConversationService;
use crate::services::message_service::{MessageService, NewMessage};
use crate::services::rate_limit::RouteClass;
use crate::state::AppState;

const DEFAULT_FETCH_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: Uuid,
    /// Canonical UUID or a `temp_<uuid>_<millis>` handle.
    pub conversation_id: Option<String>,
    pub receiver_id: Option<Uuid>,
    pub listing_id: Option<Uuid>,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message: MessageDto,
    pub conversation_id: Uuid,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub async fn send_message(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, AppError> {
    user.require_self(body.sender_id)?;

    let conv_ref = ConversationRef::parse(
        body.conversation_id.as_deref(),
        body.receiver_id,
        body.listing_id,
    )?;

    // Refs that can create a conversation burn the scarcer budget.
    let class = if conv_ref.may_create() {
        RouteClass::ConversationStart
    } else {
        RouteClass::Api
    };
    state.limiter.admit_user(user.id, class)?;

    let validation = state.guard.validate(user.id, &body.content, body.kind);
    if !validation.is_valid() {
        return Err(AppError::Validation(validation.errors));
    }

    let conversation_id = ConversationService::resolve(&state.db, user.id, &conv_ref).await?;

    let sealed = state.guard.encrypt_if_sensitive(&body.content)?;
    let (stored_content, envelope) = match &sealed {
        Some((ciphertext, envelope)) => (ciphertext.as_str(), Some(envelope)),
        None => (body.content.as_str(), None),
    };

    let message = MessageService::create(
        &state.db,
        NewMessage {
            conversation_id,
            sender_id: user.id,
            kind: body.kind,
            content: stored_content,
            envelope,
            attachment_url: None,
        },
    )
    .await?;

    // Broadcast the plaintext the sender gave us; subscribers never see
    // the at-rest ciphertext.
    let dto = message.into_dto(body.content);
    fan_out(&state, conversation_id, user.id, &dto).await;

    Ok(Json(SendMessageResponse {
        message: dto,
        conversation_id,
        warnings: validation.warnings,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FetchParams {
    /// Canonical UUID or ephemeral handle.
    pub conversation_id: Option<String>,
    pub other_user_id: Option<Uuid>,
    /// Search term across the caller's conversations.
    pub q: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub messages: Vec<MessageDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<Uuid>,
    /// True when the query named an ephemeral handle: no conversation exists
    /// yet, so the list is empty by construction.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_temporary: bool,
}

pub async fn fetch_messages(
    State(state): State<AppState>,
    user: User,
    Query(params): Query<FetchParams>,
) -> Result<Json<FetchResponse>, AppError> {
    state.limiter.admit_user(user.id, RouteClass::Api)?;
    let limit = params.limit.unwrap_or(DEFAULT_FETCH_LIMIT);

    if let Some(term) = params.q.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let messages = MessageService::search(&state.db, &state.guard, user.id, term, limit).await?;
        return Ok(Json(FetchResponse {
            messages,
            conversation_id: None,
            is_temporary: false,
        }));
    }

    if let Some(raw) = params.conversation_id.as_deref() {
        let conv_ref = ConversationRef::parse(Some(raw), None, None)?;
        return match conv_ref {
            ConversationRef::Ephemeral(_) => Ok(Json(FetchResponse {
                messages: Vec::new(),
                conversation_id: None,
                is_temporary: true,
            })),
            // The read path never creates. Resolution validates membership.
            _ => {
                let conversation_id =
                    ConversationService::resolve(&state.db, user.id, &conv_ref).await?;
                let messages =
                    MessageService::list_recent(&state.db, &state.guard, conversation_id, limit)
                        .await?;
                Ok(Json(FetchResponse {
                    messages,
                    conversation_id: Some(conversation_id),
                    is_temporary: false,
                }))
            }
        };
    }

    if let Some(other) = params.other_user_id {
        let (conversation_id, messages) =
            MessageService::list_by_user_pair(&state.db, &state.guard, user.id, other, limit)
                .await?;
        return Ok(Json(FetchResponse {
            messages,
            conversation_id,
            is_temporary: false,
        }));
    }

    Err(AppError::BadRequest(
        "conversation_id, other_user_id or q required".into(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub conversation_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub count: u64,
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, AppError> {
    state.limiter.admit_user(user.id, RouteClass::Api)?;
    Participant::verify(&state.db, user.id, body.conversation_id).await?;

    let count = MessageService::mark_read(&state.db, body.conversation_id, user.id).await?;

    // Idempotent repeats flip nothing; only a real transition is announced.
    if count > 0 {
        if let Err(e) = state
            .broadcaster
            .message_read(body.conversation_id, user.id, count)
            .await
        {
            tracing::warn!(error = %e, conversation_id = %body.conversation_id, "read receipt broadcast failed");
        }
        if let Err(e) = state
            .broadcaster
            .unread_count_changed(user.id, -(count as i64))
            .await
        {
            tracing::warn!(error = %e, "unread delta broadcast failed");
        }
    }

    Ok(Json(MarkReadResponse { count }))
}

pub async fn delete_message(
    State(state): State<AppState>,
    user: User,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.limiter.admit_user(user.id, RouteClass::Api)?;
    MessageService::delete(&state.db, message_id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UploadAttachmentRequest {
    pub sender_id: Uuid,
    pub conversation_id: Option<String>,
    pub receiver_id: Option<Uuid>,
    pub listing_id: Option<Uuid>,
    /// Reference to a file already stored by the upload collaborator.
    pub attachment_url: String,
    #[serde(default)]
    pub kind: MessageKind,
    /// Optional caption; goes through the same validation and encryption
    /// pipeline as a text body.
    #[serde(default)]
    pub caption: String,
}

pub async fn upload_attachment(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<UploadAttachmentRequest>,
) -> Result<Json<SendMessageResponse>, AppError> {
    user.require_self(body.sender_id)?;

    let conv_ref = ConversationRef::parse(
        body.conversation_id.as_deref(),
        body.receiver_id,
        body.listing_id,
    )?;

    // Same budget split as send: a ref that may create a conversation burns
    // the scarcest budget, everything else the upload budget.
    let class = if conv_ref.may_create() {
        RouteClass::ConversationStart
    } else {
        RouteClass::Upload
    };
    state.limiter.admit_user(user.id, class)?;

    if body.attachment_url.trim().is_empty() {
        return Err(AppError::BadRequest("attachment_url required".into()));
    }
    let kind = if body.kind.supports_attachment() {
        body.kind
    } else {
        MessageKind::File
    };

    let validation = state.guard.validate(user.id, &body.caption, kind);
    if !validation.is_valid() {
        return Err(AppError::Validation(validation.errors));
    }

    let conversation_id = ConversationService::resolve(&state.db, user.id, &conv_ref).await?;

    let sealed = state.guard.encrypt_if_sensitive(&body.caption)?;
    let (stored_content, envelope) = match &sealed {
        Some((ciphertext, envelope)) => (ciphertext.as_str(), Some(envelope)),
        None => (body.caption.as_str(), None),
    };

    let message = MessageService::create(
        &state.db,
        NewMessage {
            conversation_id,
            sender_id: user.id,
            kind,
            content: stored_content,
            envelope,
            attachment_url: Some(body.attachment_url.as_str()),
        },
    )
    .await?;

    let dto = message.into_dto(body.caption);
    fan_out(&state, conversation_id, user.id, &dto).await;

    Ok(Json(SendMessageResponse {
        message: dto,
        conversation_id,
        warnings: validation.warnings,
    }))
}

/// Post-persistence fan-out shared by send and upload. Best-effort: every
/// failure lands in the log, none in the response.
async fn fan_out(state: &AppState, conversation_id: Uuid, sender_id: Uuid, dto: &MessageDto) {
    let recipients =
        match ConversationService::other_participants(&state.db, conversation_id, sender_id).await
        {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, %conversation_id, "recipient lookup failed, skipping fan-out");
                return;
            }
        };

    if let Err(e) = state.broadcaster.message_new(&recipients, dto).await {
        tracing::warn!(error = %e, %conversation_id, "message broadcast degraded");
    }
    for recipient in &recipients {
        if let Err(e) = state.broadcaster.unread_count_changed(*recipient, 1).await {
            tracing::warn!(error = %e, user_id = %recipient, "unread delta broadcast degraded");
        }
    }
}
