//! Lifecycle request tracking.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use greenlight_core::lifecycle::LifecycleCoordinator;

use crate::error::AppError;

/// Axum middleware: counts the request as in-flight for its whole duration.
///
/// Once the coordinator is draining, new requests are refused with
/// `503 shutting_down` instead of being started.
pub async fn track_request(
    State(lifecycle): State<LifecycleCoordinator>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let _in_flight = lifecycle.track_request()?;
    Ok(next.run(request).await)
}
