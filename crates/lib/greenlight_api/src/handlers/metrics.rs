//! Runtime counters at `GET /debug/vars`.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use greenlight_core::data::PoolStats;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct LimiterVars {
    pub enabled: bool,
    pub tracked_clients: usize,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub version: &'static str,
    pub phase: String,
    /// Requests and background tasks currently running, this one included.
    pub in_flight: usize,
    pub rate_limiter: LimiterVars,
    /// `null` when the store has no connection pool.
    pub database: Option<PoolStats>,
    /// Unix seconds.
    pub timestamp: i64,
}

pub async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsResponse> {
    let limiter = state.pipeline.limiter();
    Json(MetricsResponse {
        version: env!("CARGO_PKG_VERSION"),
        phase: state.lifecycle.phase().to_string(),
        in_flight: state.lifecycle.in_flight(),
        rate_limiter: LimiterVars {
            enabled: limiter.enabled(),
            tracked_clients: limiter.len(),
        },
        database: state.stats.pool_stats(),
        timestamp: Utc::now().timestamp(),
    })
}
