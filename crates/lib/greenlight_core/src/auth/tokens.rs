//! Opaque bearer tokens.
//!
//! The plaintext is returned to the caller once and never stored or logged;
//! only its SHA-256 fingerprint is persisted. At most one live token exists
//! per (user, scope): issuing a new one deletes the previous ones.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::AuthError;
use crate::clock::Clock;
use crate::data::{TokenRepository, bounded};
use crate::models::auth::{IssuedToken, TokenRecord, TokenScope, User};

/// Plaintext length. 32 alphanumeric characters carry ~190 bits of entropy.
pub const TOKEN_LENGTH: usize = 32;

/// Generate a fresh token for `user_id` in `scope`, expiring one scope
/// lifetime after `now`.
pub fn generate(user_id: i64, scope: TokenScope, now: DateTime<Utc>) -> IssuedToken {
    let plaintext: String = rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect();
    let fingerprint = fingerprint(&plaintext);

    IssuedToken {
        plaintext,
        record: TokenRecord {
            fingerprint,
            user_id,
            expiry: now + scope.lifetime(),
            scope,
        },
    }
}

/// SHA-256 of the plaintext bytes.
pub fn fingerprint(plaintext: &str) -> Vec<u8> {
    Sha256::digest(plaintext.as_bytes()).to_vec()
}

/// Compare two fingerprints without short-circuiting on the first mismatch.
pub fn fingerprints_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Cheap shape check done before touching storage.
fn is_well_formed(plaintext: &str) -> bool {
    plaintext.len() == TOKEN_LENGTH && plaintext.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Issues, resolves and revokes tokens against a [`TokenRepository`].
#[derive(Clone)]
pub struct TokenStore {
    repo: Arc<dyn TokenRepository>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl TokenStore {
    pub fn new(repo: Arc<dyn TokenRepository>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            repo,
            clock,
            timeout,
        }
    }

    /// Replace any tokens of `scope` held by `user_id` with a new one.
    pub async fn new_token(&self, user_id: i64, scope: TokenScope) -> Result<IssuedToken, AuthError> {
        let token = generate(user_id, scope, self.clock.now());
        bounded(
            "token issue",
            self.timeout,
            self.repo.replace_tokens(&token.record),
        )
        .await?;
        debug!(user_id, scope = %scope, expiry = %token.record.expiry, "issued token");
        Ok(token)
    }

    /// Resolve a presented plaintext to its user.
    ///
    /// Unknown, expired and wrong-scope tokens all fail with
    /// [`AuthError::AuthenticationFailed`]. Lookups never extend expiry.
    pub async fn get_user(&self, plaintext: &str, scope: TokenScope) -> Result<User, AuthError> {
        if !is_well_formed(plaintext) {
            return Err(AuthError::AuthenticationFailed);
        }
        let hash = fingerprint(plaintext);
        let now = self.clock.now();
        bounded(
            "token lookup",
            self.timeout,
            self.repo.user_for_token(&hash, scope, now),
        )
        .await?
        .ok_or(AuthError::AuthenticationFailed)
    }

    /// Invalidate every token of `scope` for `user_id`.
    pub async fn delete_all_for_user(&self, user_id: i64, scope: TokenScope) -> Result<u64, AuthError> {
        let removed = bounded(
            "token revoke",
            self.timeout,
            self.repo.delete_tokens_for_user(user_id, scope),
        )
        .await?;
        debug!(user_id, scope = %scope, removed, "revoked tokens");
        Ok(removed)
    }
}
