//! Permission codes and the gate that checks them.
//!
//! Codes are loaded fresh for every check; nothing is cached across requests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::AuthError;
use crate::data::{PermissionRepository, bounded};
use crate::models::auth::{Principal, User};

/// Read access to the movie catalog.
pub const MOVIES_READ: &str = "movies:read";

/// Write access to the movie catalog.
pub const MOVIES_WRITE: &str = "movies:write";

/// Permission codes held by one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions(HashSet<String>);

impl Permissions {
    pub fn include(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for Permissions {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Loads a user's permission codes and enforces membership.
#[derive(Clone)]
pub struct PermissionGate {
    repo: Arc<dyn PermissionRepository>,
    timeout: Duration,
}

impl PermissionGate {
    pub fn new(repo: Arc<dyn PermissionRepository>, timeout: Duration) -> Self {
        Self { repo, timeout }
    }

    /// All codes granted to `user_id`.
    pub async fn codes_for_user(&self, user_id: i64) -> Result<Permissions, AuthError> {
        let codes = bounded(
            "permission fetch",
            self.timeout,
            self.repo.permissions_for_user(user_id),
        )
        .await?;
        Ok(codes.into_iter().collect())
    }

    /// Grant `codes` to `user_id`. Unknown codes are ignored by storage.
    pub async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<(), AuthError> {
        bounded(
            "permission grant",
            self.timeout,
            self.repo.add_permissions_for_user(user_id, codes),
        )
        .await?;
        Ok(())
    }

    /// Fail with `ActivationRequired` for an authenticated but unactivated user.
    ///
    /// Anonymous callers are rejected with `Unauthenticated`.
    pub fn require_activated<'a>(&self, principal: &'a Principal) -> Result<&'a User, AuthError> {
        let user = principal.user().ok_or(AuthError::Unauthenticated)?;
        if !user.activated {
            return Err(AuthError::ActivationRequired);
        }
        Ok(user)
    }

    /// Fail unless `principal` is an activated user holding `code`.
    ///
    /// Anonymous callers get `Forbidden`, never `Unauthenticated`: a route
    /// that needs a permission does not reveal whether credentials would help.
    pub async fn require(&self, principal: &Principal, code: &str) -> Result<(), AuthError> {
        let Some(user) = principal.user() else {
            debug!(code, "anonymous caller denied");
            return Err(AuthError::Forbidden(format!("missing permission '{code}'")));
        };
        if !user.activated {
            return Err(AuthError::ActivationRequired);
        }

        let permissions = self.codes_for_user(user.id).await?;
        if !permissions.include(code) {
            debug!(user_id = user.id, code, "permission denied");
            return Err(AuthError::Forbidden(format!("missing permission '{code}'")));
        }
        Ok(())
    }
}
