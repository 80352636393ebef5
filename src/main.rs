use std::time::Duration;

use messaging_service::{config, db, error, logging, migrations, routes, state::AppState};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let pool = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    // Schema must be in sync before serving traffic.
    migrations::run_all(&pool)
        .await
        .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;

    // Redis is optional; without it fan-out stays process-local.
    let redis = match cfg.redis_url.as_deref() {
        Some(url) => Some(
            redis::Client::open(url)
                .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?,
        ),
        None => None,
    };

    let port = cfg.port;
    let state = AppState::new(pool, cfg, redis.clone());

    // Cross-instance fan-out listener. Reconnects with backoff; realtime
    // delivery is best-effort so a dead listener never stops the server.
    if let Some(client) = redis {
        let registry = state.registry.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) =
                    messaging_service::websocket::pubsub::start_psub_listener(
                        client.clone(),
                        registry.clone(),
                    )
                    .await
                {
                    tracing::warn!(error = %e, "pubsub listener exited, reconnecting");
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
    }

    // Periodic sweep of expired rate-limit windows.
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(300));
        loop {
            tick.tick().await;
            limiter.sweep();
        }
    });

    let app = routes::build_router(state);
    let bind_addr = format!("0.0.0.0:{port}");
    tracing::info!(%bind_addr, "starting messaging-service");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    Ok(())
}
