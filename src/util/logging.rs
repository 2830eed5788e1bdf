use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const ENV_LOG: &str = "FREIGHT_LOG";
pub const ENV_LOG_JSON: &str = "FREIGHT_LOG_JSON";

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.trim(), "1" | "true" | "TRUE" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Installs the global subscriber. Filter from `FREIGHT_LOG`, JSON lines when
/// `FREIGHT_LOG_JSON` is set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("info"));
    if env_bool(ENV_LOG_JSON, false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
