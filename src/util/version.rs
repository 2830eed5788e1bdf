pub const APP_NAME: &str = "Freight Offers";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Value sent as the HTTP `User-Agent`.
pub fn user_agent() -> String {
    format!("freight-offers/{APP_VERSION}")
}
