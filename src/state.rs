use std::sync::Arc;

use sqlx::{Pool, Postgres};

use crate::config::Config;
use crate::services::content_guard::ContentGuard;
use crate::services::rate_limit::RateLimiter;
use crate::websocket::broadcast::Broadcaster;
use crate::websocket::ConnectionRegistry;

/// Shared per-process services, cloned into every handler. All mutable state
/// lives behind its own synchronization; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub registry: ConnectionRegistry,
    pub broadcaster: Broadcaster,
    pub guard: Arc<ContentGuard>,
    pub limiter: Arc<RateLimiter>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Pool<Postgres>, config: Config, redis: Option<redis::Client>) -> Self {
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(registry.clone(), redis);
        let guard = Arc::new(ContentGuard::new(&config.encryption_master_key));
        let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
        Self {
            db,
            registry,
            broadcaster,
            guard,
            limiter,
            config: Arc::new(config),
        }
    }
}
