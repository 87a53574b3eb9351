use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. RUST_LOG takes precedence over `level`.
pub fn init(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("moira={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
