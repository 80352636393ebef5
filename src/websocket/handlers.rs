use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::middleware::auth::verify_jwt;
use crate::services::conversation_service::ConversationService;
use crate::state::AppState;
use crate::websocket::events::WsInboundEvent;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Room to join. A connection without one still receives events on the
    /// caller's private user channel (new-message pushes, unread counters).
    pub conversation_id: Option<Uuid>,
    /// Browsers cannot set headers on WebSocket upgrade, so the token may
    /// come in the query string instead of `Authorization`.
    pub token: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_id = match authenticate(&params, &headers, &state) {
        Ok(id) => id,
        Err(status) => return status.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(state, user_id, params.conversation_id, socket))
}

/// The connection identity comes from the token, never from a query param.
fn authenticate(
    params: &WsParams,
    headers: &HeaderMap,
    state: &AppState,
) -> Result<Uuid, StatusCode> {
    let token = params.token.clone().or_else(|| {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    });

    let Some(token) = token else {
        warn!("websocket rejected: no token supplied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let claims = verify_jwt(&token, &state.config.jwt_secret).map_err(|_| {
        warn!("websocket rejected: invalid token");
        StatusCode::UNAUTHORIZED
    })?;

    Uuid::parse_str(&claims.sub).map_err(|_| StatusCode::UNAUTHORIZED)
}

async fn handle_socket(
    state: AppState,
    user_id: Uuid,
    conversation_id: Option<Uuid>,
    mut socket: WebSocket,
) {
    // Joining a room requires membership.
    if let Some(room) = conversation_id {
        match ConversationService::is_participant(&state.db, room, user_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(%user_id, conversation_id = %room, "websocket rejected: not a participant");
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            Err(e) => {
                warn!(%user_id, conversation_id = %room, error = %e, "websocket rejected: membership check failed");
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        }
    }

    let mut rx = state.registry.subscribe(user_id, conversation_id).await;
    debug!(%user_id, ?conversation_id, "websocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            maybe = rx.recv() => {
                match maybe {
                    Some(msg) => {
                        if sender.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            incoming = receiver.next() => {
                if !handle_client_message(&state, user_id, conversation_id, &incoming).await {
                    break;
                }
            }
        }
    }

    debug!(%user_id, "websocket disconnected");
}

async fn handle_client_message(
    state: &AppState,
    user_id: Uuid,
    joined_room: Option<Uuid>,
    incoming: &Option<Result<Message, axum::Error>>,
) -> bool {
    match incoming {
        Some(Ok(Message::Text(txt))) => {
            if let Ok(event) = serde_json::from_str::<WsInboundEvent>(txt) {
                handle_inbound_event(state, user_id, joined_room, &event).await;
            }
            true
        }
        Some(Ok(Message::Ping(_))) => {
            // Pong is handled by the framework
            true
        }
        Some(Ok(Message::Close(_))) | None => false,
        _ => true,
    }
}

async fn handle_inbound_event(
    state: &AppState,
    user_id: Uuid,
    joined_room: Option<Uuid>,
    event: &WsInboundEvent,
) {
    match event {
        WsInboundEvent::Typing { conversation_id } => {
            // Relay only within the room this connection joined. Membership
            // was verified at subscribe time.
            if joined_room != Some(*conversation_id) {
                return;
            }
            if let Err(e) = state.broadcaster.typing(*conversation_id, user_id).await {
                warn!(error = %e, "typing relay failed");
            }
        }
    }
}
