//! Password hashing via bcrypt.

use super::AuthError;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 12;

/// Minimum accepted password length in bytes.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Maximum accepted password length in bytes (bcrypt truncates beyond 72).
pub const MAX_PASSWORD_LEN: usize = 72;

/// Check length bounds before hashing.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::ValidationError(format!(
            "password must be at least {MIN_PASSWORD_LEN} bytes long"
        )));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(AuthError::ValidationError(format!(
            "password must not be more than {MAX_PASSWORD_LEN} bytes long"
        )));
    }
    Ok(())
}

/// Hash a password with bcrypt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
}
