//! Admission middleware: rate limit, Bearer authentication, authorization.
//!
//! [`rate_limit`] wraps the whole router so unmatched paths are throttled
//! too. [`admit`] sits on each route group and runs after it.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use axum::http::header::AUTHORIZATION;
use greenlight_core::pipeline::{Access, RequestPipeline};

use crate::AppState;
use crate::error::AppError;

/// Client identity used when the peer address is unknown.
const UNKNOWN_CLIENT: &str = "unknown";

/// Middleware state: the shared pipeline plus one route group's requirement.
#[derive(Clone)]
pub struct Admission {
    pipeline: RequestPipeline,
    access: Access,
}

impl Admission {
    pub fn new(state: &AppState, access: Access) -> Self {
        Self {
            pipeline: state.pipeline.clone(),
            access,
        }
    }
}

/// Peer IP from `ConnectInfo`, or [`UNKNOWN_CLIENT`] when served without it.
pub fn client_identity(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Axum middleware: spends one credit from the caller's bucket.
pub async fn rate_limit(
    State(pipeline): State<RequestPipeline>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    pipeline.throttle(&client_identity(&request))?;
    Ok(next.run(request).await)
}

/// Axum middleware: authenticates and authorizes the caller, then injects
/// the resolved `Principal` into request extensions.
pub async fn admit(
    State(admission): State<Admission>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // A non-ASCII header becomes an empty credential and fails authentication.
    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .map(|value| value.to_str().unwrap_or_default().to_owned());

    let principal = admission
        .pipeline
        .resolve(authorization.as_deref(), admission.access)
        .await?;

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
