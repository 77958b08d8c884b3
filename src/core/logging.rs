use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_logging(log_level: &str) {
    // RUST_LOG wins; otherwise scope the configured level to our crate so
    // sqlx/reqwest internals stay quiet.
    let default_directives = format!("warn,marketplace_scout_bot={}", log_level);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    tracing::info!("Logging initialized at level: {}", log_level);
}
