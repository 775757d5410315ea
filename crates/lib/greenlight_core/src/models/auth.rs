//! Authentication domain models.
//!
//! These are internal domain models; the HTTP layer serializes a subset of
//! them directly (password hashes and token fingerprints are never exposed).

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Domain user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub activated: bool,
    pub version: i32,
}

/// Fields needed to insert a user; id, timestamps and version are assigned by storage.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub activated: bool,
}

/// Purpose a token was issued for. Matches the `tokens.scope` text column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenScope {
    #[serde(rename = "activation")]
    Activation,
    #[serde(rename = "authentication")]
    Authentication,
    #[serde(rename = "password-reset")]
    PasswordReset,
}

impl TokenScope {
    /// Database text representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Activation => "activation",
            TokenScope::Authentication => "authentication",
            TokenScope::PasswordReset => "password-reset",
        }
    }

    /// How long a freshly issued token of this scope stays valid.
    pub fn lifetime(&self) -> Duration {
        match self {
            TokenScope::Activation => Duration::days(3),
            TokenScope::Authentication => Duration::hours(24),
            TokenScope::PasswordReset => Duration::minutes(45),
        }
    }
}

impl std::fmt::Display for TokenScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored scope string is not one of the known scopes.
#[derive(Debug, thiserror::Error)]
#[error("unknown token scope '{0}'")]
pub struct UnknownScope(pub String);

impl FromStr for TokenScope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activation" => Ok(TokenScope::Activation),
            "authentication" => Ok(TokenScope::Authentication),
            "password-reset" => Ok(TokenScope::PasswordReset),
            other => Err(UnknownScope(other.to_string())),
        }
    }
}

/// Token row as persisted: the plaintext is never part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// SHA-256 of the plaintext.
    pub fingerprint: Vec<u8>,
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    pub scope: TokenScope,
}

impl TokenRecord {
    /// When the token was generated, recovered from its scope lifetime.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.expiry - self.scope.lifetime()
    }
}

/// Freshly generated token. `plaintext` is handed to the caller once.
#[derive(Clone)]
pub struct IssuedToken {
    pub plaintext: String,
    pub record: TokenRecord,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("plaintext", &"<redacted>")
            .field("record", &self.record)
            .finish()
    }
}

/// Caller identity attached to a request after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// No `Authorization` header was presented.
    Anonymous,
    /// A valid authentication token resolved to this user.
    User(User),
}

impl Principal {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Principal::Anonymous => None,
            Principal::User(user) => Some(user),
        }
    }
}
