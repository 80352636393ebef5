use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dotenvy::dotenv;
use std::env;

use crate::services::rate_limit::RateLimitBudgets;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub port: u16,
    pub jwt_secret: String,
    pub encryption_master_key: [u8; 32],
    pub rate_limits: RateLimitBudgets,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        // Redis is optional: without it, fan-out stays process-local.
        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| crate::error::AppError::Config("JWT_SECRET missing".into()))?;
        if jwt_secret.trim().is_empty() {
            return Err(crate::error::AppError::Config("JWT_SECRET empty".into()));
        }

        let master_key_b64 = env::var("MESSAGE_ENCRYPTION_MASTER_KEY").map_err(|_| {
            crate::error::AppError::Config("MESSAGE_ENCRYPTION_MASTER_KEY missing".into())
        })?;
        let master_key_bytes = STANDARD.decode(master_key_b64.trim()).map_err(|_| {
            crate::error::AppError::Config("MESSAGE_ENCRYPTION_MASTER_KEY invalid base64".into())
        })?;
        if master_key_bytes.len() != 32 {
            return Err(crate::error::AppError::Config(
                "MESSAGE_ENCRYPTION_MASTER_KEY must decode to 32 bytes".into(),
            ));
        }
        let mut encryption_master_key = [0u8; 32];
        encryption_master_key.copy_from_slice(&master_key_bytes);

        Ok(Self {
            database_url,
            redis_url,
            port,
            jwt_secret,
            encryption_master_key,
            rate_limits: RateLimitBudgets::from_env(),
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/test".into(),
            redis_url: None,
            port: 3000,
            jwt_secret: "test-secret".into(),
            encryption_master_key: [0u8; 32],
            rate_limits: RateLimitBudgets::default(),
        }
    }
}
