//! Request admission: rate limit, then authenticate, then authorize.
//!
//! The three stages always run in that order and each fails fast with its
//! own error kind. Nothing here converts a specific failure into a generic one.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::auth::AuthError;
use crate::auth::permissions::PermissionGate;
use crate::auth::tokens::TokenStore;
use crate::models::auth::{Principal, TokenScope};
use crate::ratelimit::{RateLimited, RateLimiter};

/// What a route requires of its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Anyone, including anonymous callers.
    Public,
    /// Any authenticated user, activated or not.
    Authenticated,
    /// An authenticated, activated user.
    Activated,
    /// An activated user holding the given permission code.
    Permission(&'static str),
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Composes [`RateLimiter`], [`TokenStore`] and [`PermissionGate`].
#[derive(Clone)]
pub struct RequestPipeline {
    limiter: Arc<RateLimiter>,
    tokens: TokenStore,
    gate: PermissionGate,
}

impl RequestPipeline {
    pub fn new(limiter: Arc<RateLimiter>, tokens: TokenStore, gate: PermissionGate) -> Self {
        Self {
            limiter,
            tokens,
            gate,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    /// Admit one request from `client` presenting `authorization`.
    ///
    /// Returns the resolved principal for the handler.
    pub async fn admit(
        &self,
        client: &str,
        authorization: Option<&str>,
        access: Access,
    ) -> Result<Principal, AdmissionError> {
        self.throttle(client)?;
        Ok(self.resolve(authorization, access).await?)
    }

    /// Rate-limit stage on its own. A no-op when the limiter is disabled.
    ///
    /// HTTP runs this for every inbound request, routed or not, and
    /// [`Self::resolve`] only on matched routes.
    pub fn throttle(&self, client: &str) -> Result<(), RateLimited> {
        if self.limiter.enabled() {
            self.limiter.check(client)?;
        }
        Ok(())
    }

    /// Authenticate, then authorize against `access`.
    pub async fn resolve(
        &self,
        authorization: Option<&str>,
        access: Access,
    ) -> Result<Principal, AuthError> {
        let principal = self.authenticate(authorization).await?;
        self.authorize(&principal, access).await?;
        Ok(principal)
    }

    /// Resolve the `Authorization` header. Absence means anonymous.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Principal, AuthError> {
        let Some(value) = authorization else {
            return Ok(Principal::Anonymous);
        };

        let token = bearer_token(value).ok_or_else(|| {
            debug!("malformed authorization header");
            AuthError::AuthenticationFailed
        })?;

        let user = self
            .tokens
            .get_user(token, TokenScope::Authentication)
            .await?;
        Ok(Principal::User(user))
    }

    pub async fn authorize(&self, principal: &Principal, access: Access) -> Result<(), AuthError> {
        match access {
            Access::Public => Ok(()),
            Access::Authenticated => {
                if principal.is_anonymous() {
                    Err(AuthError::Unauthenticated)
                } else {
                    Ok(())
                }
            }
            Access::Activated => self.gate.require_activated(principal).map(|_| ()),
            Access::Permission(code) => self.gate.require(principal, code).await,
        }
    }
}

/// Extract the token from `Bearer <token>`.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}
