use tracing_subscriber::{fmt, EnvFilter};

/// Initialize tracing subscriber with env filter
/// Default: info level, can be overridden with RUST_LOG
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    fmt().with_env_filter(env_filter).with_target(false).init();
}
