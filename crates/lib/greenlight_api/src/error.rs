//! Application error types.
//!
//! Every failure kind from the core keeps its own status and machine-readable
//! code here; nothing is folded into a generic error on the way out.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use greenlight_core::auth::AuthError;
use greenlight_core::data::DataError;
use greenlight_core::lifecycle::LifecycleError;
use greenlight_core::models::movie::ValidationErrors;
use greenlight_core::pipeline::AdmissionError;
use greenlight_core::ratelimit::RateLimited;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },

    #[error("invalid or missing authentication token")]
    AuthenticationFailed,

    #[error("you must be authenticated to access this resource")]
    Unauthenticated,

    #[error("invalid authentication credentials")]
    InvalidCredentials,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("your user account must be activated to access this resource")]
    ActivationRequired,

    #[error("Validation error: {0}")]
    Validation(ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("the requested resource could not be found")]
    NotFound,

    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("{0}")]
    Timeout(String),

    #[error("the server is shutting down")]
    ShuttingDown,

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    /// Single-field validation failure.
    pub fn invalid(field: &str, message: &str) -> Self {
        let mut errors = ValidationErrors::default();
        errors.check(false, field, message);
        AppError::Validation(errors)
    }
}

/// `Retry-After` is whole seconds, rounded up, never zero.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    let secs = if retry_after.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    };
    secs.max(1)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error, fields) = match &self {
            AppError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited", None),
            AppError::AuthenticationFailed => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "authentication_required", None)
            }
            AppError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "invalid_credentials", None)
            }
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", None),
            AppError::ActivationRequired => (StatusCode::FORBIDDEN, "activation_required", None),
            AppError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                Some(errors.0.clone()),
            ),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", None),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found", None),
            AppError::EditConflict => (StatusCode::CONFLICT, "edit_conflict", None),
            AppError::Timeout(detail) => {
                warn!("{detail}");
                (StatusCode::SERVICE_UNAVAILABLE, "timeout", None)
            }
            AppError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down", None),
            AppError::Internal(detail) => {
                error!("internal error: {detail}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let message = match &self {
            AppError::Internal(_) => "the server encountered a problem and could not process your request".to_string(),
            AppError::Timeout(_) => "the server took too long to respond, please try again".to_string(),
            _ => message,
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
            fields,
        });
        let mut response = (status, body).into_response();

        match &self {
            AppError::RateLimited { retry_after } => {
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(retry_after_secs(*retry_after)),
                );
            }
            AppError::AuthenticationFailed | AppError::Unauthenticated => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }
        response
    }
}

impl From<DataError> for AppError {
    fn from(e: DataError) -> Self {
        match e {
            DataError::NotFound => AppError::NotFound,
            DataError::EditConflict => AppError::EditConflict,
            DataError::DuplicateEmail => {
                AppError::invalid("email", "a user with this email address already exists")
            }
            e @ DataError::Timeout { .. } => AppError::Timeout(e.to_string()),
            DataError::Db(e) => AppError::Internal(e.to_string()),
            DataError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::AuthenticationFailed => AppError::AuthenticationFailed,
            AuthError::Unauthenticated => AppError::Unauthenticated,
            AuthError::Forbidden(msg) => AppError::Forbidden(msg),
            AuthError::ActivationRequired => AppError::ActivationRequired,
            AuthError::CredentialError => AppError::InvalidCredentials,
            AuthError::ValidationError(msg) => AppError::BadRequest(msg),
            AuthError::Data(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<RateLimited> for AppError {
    fn from(e: RateLimited) -> Self {
        AppError::RateLimited {
            retry_after: e.retry_after,
        }
    }
}

impl From<AdmissionError> for AppError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::RateLimited(e) => AppError::from(e),
            AdmissionError::Auth(e) => AppError::from(e),
        }
    }
}

impl From<LifecycleError> for AppError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::ShuttingDown => AppError::ShuttingDown,
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(e: ValidationErrors) -> Self {
        AppError::Validation(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        assert_eq!(retry_after_secs(Duration::from_millis(500)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(2)), 2);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::MAX), u64::MAX);
    }

    #[test]
    fn each_kind_has_its_own_status() {
        let cases = [
            (
                AppError::RateLimited {
                    retry_after: Duration::from_millis(500),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (AppError::AuthenticationFailed, StatusCode::UNAUTHORIZED),
            (AppError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (AppError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (AppError::ActivationRequired, StatusCode::FORBIDDEN),
            (AppError::EditConflict, StatusCode::CONFLICT),
            (AppError::NotFound, StatusCode::NOT_FOUND),
            (AppError::Timeout("slow".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let resp = AppError::RateLimited {
            retry_after: Duration::from_millis(500),
        }
        .into_response();
        assert_eq!(resp.headers()[header::RETRY_AFTER], "1");
    }

    #[test]
    fn invalid_token_challenges_for_bearer() {
        let resp = AppError::AuthenticationFailed.into_response();
        assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[test]
    fn duplicate_email_is_a_field_error() {
        let err = AppError::from(DataError::DuplicateEmail);
        match err {
            AppError::Validation(v) => assert!(v.0.contains_key("email")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
