//! Authentication and authorization logic.
//!
//! Opaque bearer tokens (stored only as fingerprints), password hashing and
//! the permission gate, shared by the request pipeline and the API handlers.

pub mod password;
pub mod permissions;
pub mod tokens;

use thiserror::Error;

use crate::data::DataError;

/// Authentication and authorization errors.
///
/// The variants are kept distinct all the way to the HTTP layer: "who are
/// you" (`AuthenticationFailed`, `Unauthenticated`) never collapses into
/// "you may not do that" (`Forbidden`, `ActivationRequired`).
#[derive(Debug, Error)]
pub enum AuthError {
    /// A token was presented but is unknown, expired, or for another scope.
    #[error("invalid or missing authentication token")]
    AuthenticationFailed,

    /// No credential was supplied for a route that needs one.
    #[error("you must be authenticated to access this resource")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("your user account must be activated to access this resource")]
    ActivationRequired,

    #[error("Invalid credentials")]
    CredentialError,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Internal error: {0}")]
    Internal(String),
}
