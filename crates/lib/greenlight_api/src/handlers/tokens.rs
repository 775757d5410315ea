//! Token issuance and revocation handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use greenlight_core::models::auth::Principal;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::AppResult;
use crate::services::accounts;

#[derive(Debug, Deserialize)]
pub struct ActivationTokenRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticationTokenRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct TokenBody {
    pub token: String,
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AuthenticationTokenResponse {
    pub authentication_token: TokenBody,
}

/// `POST /v1/tokens/activation`: email a fresh activation token.
pub async fn create_activation_token_handler(
    State(state): State<AppState>,
    Json(body): Json<ActivationTokenRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    accounts::resend_activation(&state, &body.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "an email will be sent to you containing activation instructions".into(),
        }),
    ))
}

/// `POST /v1/tokens/authentication`: exchange credentials for a bearer token.
///
/// This is the only time the plaintext is ever returned.
pub async fn create_authentication_token_handler(
    State(state): State<AppState>,
    Json(body): Json<AuthenticationTokenRequest>,
) -> AppResult<(StatusCode, Json<AuthenticationTokenResponse>)> {
    let issued = accounts::login(&state, &body.email, &body.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthenticationTokenResponse {
            authentication_token: TokenBody {
                expiry: issued.record.expiry,
                token: issued.plaintext,
            },
        }),
    ))
}

/// `DELETE /v1/tokens/authentication`: revoke the caller's authentication tokens.
pub async fn delete_authentication_tokens_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> AppResult<Json<MessageResponse>> {
    accounts::logout(&state, &principal).await?;
    Ok(Json(MessageResponse {
        message: "authentication tokens revoked".into(),
    }))
}
