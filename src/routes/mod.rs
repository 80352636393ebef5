use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::middleware::auth::auth_middleware;
use crate::state::AppState;
use crate::websocket::handlers::ws_handler;

pub mod conversations;
pub mod messages;

use conversations::{delete_conversation, get_conversation, list_conversations, unread_total};
use messages::{delete_message, fetch_messages, mark_read, send_message, upload_attachment};

pub fn build_router(state: AppState) -> Router {
    // Business routes behind bearer auth.
    let api_v1 = Router::new()
        .route("/messages", post(send_message).get(fetch_messages))
        .route("/messages/read", post(mark_read))
        .route("/messages/:id", delete(delete_message))
        .route("/attachments", post(upload_attachment))
        .route("/conversations", get(list_conversations))
        .route("/conversations/unread-count", get(unread_total))
        .route(
            "/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        // Added after the layer, so it skips bearer auth: the upgrade
        // handler does its own token check (browsers cannot set headers on
        // a WebSocket upgrade).
        .route("/ws", get(ws_handler));

    let router = Router::new()
        .route("/health", get(|| async { "OK" }))
        .nest("/api/v1", api_v1);

    crate::middleware::with_defaults(router).with_state(state)
}
