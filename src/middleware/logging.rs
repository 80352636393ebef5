use axum::http;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::state::AppState;

const SLOW_REQUEST_MS: u64 = 1_000;

/// HTTP trace layer: one span per request, status + latency on completion.
pub fn add_tracing(router: Router<AppState>) -> Router<AppState> {
    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &http::Request<_>| {
                let method = req.method().clone();
                let path = req.uri().path().to_string();
                tracing::span!(Level::INFO, "request", %method, %path)
            })
            .on_response(
                |res: &http::Response<_>, latency: std::time::Duration, _span: &tracing::Span| {
                    let elapsed_ms = latency.as_millis() as u64;
                    if elapsed_ms >= SLOW_REQUEST_MS {
                        tracing::warn!(status = %res.status(), elapsed_ms, "slow request");
                    } else {
                        tracing::info!(status = %res.status(), elapsed_ms, "completed");
                    }
                },
            ),
    )
}
