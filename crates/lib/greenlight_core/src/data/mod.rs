//! Storage seams.
//!
//! Each concern the admission core touches in the database is a small
//! `async_trait` repository. [`postgres::PgStore`] is the production
//! implementation; [`memory::MemoryStore`] keeps the same contracts in
//! process for tests and local runs.

pub mod memory;
pub mod postgres;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::auth::{NewUser, TokenRecord, TokenScope, User};
use crate::models::movie::Movie;
use crate::version::Versioned;

/// Default deadline for a single storage round trip.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Storage errors.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("record not found")]
    NotFound,

    #[error("edit conflict")]
    EditConflict,

    #[error("a user with this email address already exists")]
    DuplicateEmail,

    #[error("{operation} exceeded its {timeout:?} deadline")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Run a storage future under a deadline, mapping expiry to [`DataError::Timeout`].
pub async fn bounded<T, F>(operation: &'static str, timeout: Duration, fut: F) -> Result<T, DataError>
where
    F: Future<Output = Result<T, DataError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(DataError::Timeout { operation, timeout }),
    }
}

/// Records whose writes are guarded by an integer version column.
#[async_trait]
pub trait VersionedRepository<R>: Send + Sync
where
    R: Versioned + Send + Sync + 'static,
{
    /// Load the current state of `id`.
    async fn fetch(&self, id: i64) -> Result<Option<R>, DataError>;

    /// Whether a row with `id` exists at all.
    async fn exists(&self, id: i64) -> Result<bool, DataError>;

    /// Write `record` only if the stored version still equals `expected`,
    /// bumping the version by one. Returns the new version, or `None` when no
    /// row matched.
    async fn update_if_version(&self, record: &R, expected: i32) -> Result<Option<i32>, DataError>;
}

/// User rows.
#[async_trait]
pub trait UserRepository: VersionedRepository<User> {
    async fn insert_user(&self, user: NewUser) -> Result<User, DataError>;

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, DataError>;
}

/// Token rows. Only fingerprints are stored.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Delete every token of `record.scope` for `record.user_id`, then store
    /// `record`, as one unit. Tokens already expired at `record.issued_at()`
    /// are purged on the way.
    async fn replace_tokens(&self, record: &TokenRecord) -> Result<(), DataError>;

    /// Delete every token of `scope` for `user_id`, returning how many were removed.
    async fn delete_tokens_for_user(&self, user_id: i64, scope: TokenScope)
    -> Result<u64, DataError>;

    /// Resolve a fingerprint to its user when a token with that fingerprint and
    /// scope exists and expires strictly after `now`.
    async fn user_for_token(
        &self,
        fingerprint: &[u8],
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, DataError>;
}

/// Many-to-many user ↔ permission-code join.
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Vec<String>, DataError>;

    async fn add_permissions_for_user(&self, user_id: i64, codes: &[&str])
    -> Result<(), DataError>;
}

/// Movie rows.
#[async_trait]
pub trait MovieRepository: VersionedRepository<Movie> {
    /// Insert a movie, returning it with id, creation time and version 1 assigned.
    async fn insert_movie(&self, movie: &Movie) -> Result<Movie, DataError>;

    /// Delete a movie, failing with [`DataError::NotFound`] when nothing was removed.
    async fn delete_movie(&self, id: i64) -> Result<(), DataError>;
}

/// Connection pool counters published by the metrics endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_open_connections: u32,
    pub open_connections: u32,
    pub idle_connections: usize,
}

/// Backends that can report on their connections.
pub trait StoreStats: Send + Sync {
    /// `None` when the backend has no pool.
    fn pool_stats(&self) -> Option<PoolStats>;
}
