//! Liveness endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub environment: String,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthcheckResponse {
    pub status: &'static str,
    pub system_info: SystemInfo,
}

/// `GET /v1/healthcheck`: report availability, environment and version.
pub async fn healthcheck(State(state): State<AppState>) -> Json<HealthcheckResponse> {
    Json(HealthcheckResponse {
        status: "available",
        system_info: SystemInfo {
            environment: state.config.env.clone(),
            version: env!("CARGO_PKG_VERSION"),
        },
    })
}
