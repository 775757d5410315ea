//! User registration and activation handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use greenlight_core::models::auth::User;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::AppResult;
use crate::services::accounts;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: User,
}

/// `POST /v1/users`: register a new, unactivated user.
///
/// Responds 202: the welcome email is still being sent in the background.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let user = accounts::register(&state, &body.name, &body.email, &body.password).await?;
    Ok((StatusCode::ACCEPTED, Json(UserResponse { user })))
}

/// `PUT /v1/users/activated`: consume an activation token.
pub async fn activate_handler(
    State(state): State<AppState>,
    Json(body): Json<ActivateRequest>,
) -> AppResult<Json<UserResponse>> {
    let user = accounts::activate(&state, &body.token).await?;
    Ok(Json(UserResponse { user }))
}
