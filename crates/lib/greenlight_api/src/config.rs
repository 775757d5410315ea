//! API server configuration.

use std::time::Duration;

use greenlight_core::data::DEFAULT_QUERY_TIMEOUT;

/// Values consumed by the router and handlers.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Operating environment reported by the healthcheck
    /// (`development`, `staging` or `production`).
    pub env: String,
    /// Origins allowed by CORS. Empty disables cross-origin access.
    pub cors_trusted_origins: Vec<String>,
    /// Deadline applied to every storage round trip and mail delivery attempt.
    pub query_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            env: "development".into(),
            cors_trusted_origins: Vec::new(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}
