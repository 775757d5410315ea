//! In-process repositories with the same contracts as [`super::postgres::PgStore`].
//!
//! All state sits behind one mutex, so every conditional write is atomic the
//! way a single-row `UPDATE ... WHERE version = $n` is in PostgreSQL.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    DataError, MovieRepository, PermissionRepository, PoolStats, StoreStats, TokenRepository,
    UserRepository, VersionedRepository,
};
use crate::auth::tokens::fingerprints_match;
use crate::models::auth::{NewUser, TokenRecord, TokenScope, User};
use crate::models::movie::Movie;

/// Permission codes seeded by the initial migration.
const SEEDED_PERMISSIONS: [&str; 2] = ["movies:read", "movies:write"];

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<i64, User>,
    next_user_id: i64,
    tokens: Vec<TokenRecord>,
    permissions: HashMap<i64, BTreeSet<String>>,
    movies: BTreeMap<i64, Movie>,
    next_movie_id: i64,
}

/// Mutex-guarded tables standing in for the database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    latency: Mutex<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before touching state.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Number of stored tokens (live or expired) for `user_id` in `scope`.
    pub fn token_count(&self, user_id: i64, scope: TokenScope) -> usize {
        self.state()
            .tokens
            .iter()
            .filter(|t| t.user_id == user_id && t.scope == scope)
            .count()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_io(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl VersionedRepository<User> for MemoryStore {
    async fn fetch(&self, id: i64) -> Result<Option<User>, DataError> {
        self.simulate_io().await;
        Ok(self.state().users.get(&id).cloned())
    }

    async fn exists(&self, id: i64) -> Result<bool, DataError> {
        self.simulate_io().await;
        Ok(self.state().users.contains_key(&id))
    }

    async fn update_if_version(&self, user: &User, expected: i32) -> Result<Option<i32>, DataError> {
        self.simulate_io().await;
        let mut state = self.state();
        if state
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(DataError::DuplicateEmail);
        }
        match state.users.get_mut(&user.id) {
            Some(stored) if stored.version == expected => {
                let version = expected + 1;
                *stored = User {
                    version,
                    ..user.clone()
                };
                Ok(Some(version))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<User, DataError> {
        self.simulate_io().await;
        let mut state = self.state();
        if state.users.values().any(|u| u.email == user.email) {
            return Err(DataError::DuplicateEmail);
        }
        state.next_user_id += 1;
        let stored = User {
            id: state.next_user_id,
            created_at: Utc::now(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            activated: user.activated,
            version: 1,
        };
        state.users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, DataError> {
        self.simulate_io().await;
        Ok(self
            .state()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }
}

impl StoreStats for MemoryStore {
    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn replace_tokens(&self, record: &TokenRecord) -> Result<(), DataError> {
        self.simulate_io().await;
        let issued_at = record.issued_at();
        let mut state = self.state();
        state.tokens.retain(|t| {
            t.expiry > issued_at && !(t.user_id == record.user_id && t.scope == record.scope)
        });
        state.tokens.push(record.clone());
        Ok(())
    }

    async fn delete_tokens_for_user(
        &self,
        user_id: i64,
        scope: TokenScope,
    ) -> Result<u64, DataError> {
        self.simulate_io().await;
        let mut state = self.state();
        let before = state.tokens.len();
        state
            .tokens
            .retain(|t| !(t.user_id == user_id && t.scope == scope));
        Ok((before - state.tokens.len()) as u64)
    }

    async fn user_for_token(
        &self,
        fingerprint: &[u8],
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, DataError> {
        self.simulate_io().await;
        let state = self.state();
        let user_id = state
            .tokens
            .iter()
            .find(|t| t.scope == scope && t.expiry > now && fingerprints_match(&t.fingerprint, fingerprint))
            .map(|t| t.user_id);
        Ok(user_id.and_then(|id| state.users.get(&id).cloned()))
    }
}

#[async_trait]
impl PermissionRepository for MemoryStore {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Vec<String>, DataError> {
        self.simulate_io().await;
        Ok(self
            .state()
            .permissions
            .get(&user_id)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_permissions_for_user(
        &self,
        user_id: i64,
        codes: &[&str],
    ) -> Result<(), DataError> {
        self.simulate_io().await;
        let mut state = self.state();
        let granted = state.permissions.entry(user_id).or_default();
        for code in codes.iter().filter(|c| SEEDED_PERMISSIONS.contains(c)) {
            granted.insert(code.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl VersionedRepository<Movie> for MemoryStore {
    async fn fetch(&self, id: i64) -> Result<Option<Movie>, DataError> {
        self.simulate_io().await;
        Ok(self.state().movies.get(&id).cloned())
    }

    async fn exists(&self, id: i64) -> Result<bool, DataError> {
        self.simulate_io().await;
        Ok(self.state().movies.contains_key(&id))
    }

    async fn update_if_version(
        &self,
        movie: &Movie,
        expected: i32,
    ) -> Result<Option<i32>, DataError> {
        self.simulate_io().await;
        let mut state = self.state();
        match state.movies.get_mut(&movie.id) {
            Some(stored) if stored.version == expected => {
                let version = expected + 1;
                *stored = Movie {
                    version,
                    created_at: stored.created_at,
                    ..movie.clone()
                };
                Ok(Some(version))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl MovieRepository for MemoryStore {
    async fn insert_movie(&self, movie: &Movie) -> Result<Movie, DataError> {
        self.simulate_io().await;
        let mut state = self.state();
        state.next_movie_id += 1;
        let stored = Movie {
            id: state.next_movie_id,
            created_at: Utc::now(),
            version: 1,
            ..movie.clone()
        };
        state.movies.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete_movie(&self, id: i64) -> Result<(), DataError> {
        self.simulate_io().await;
        match self.state().movies.remove(&id) {
            Some(_) => Ok(()),
            None => Err(DataError::NotFound),
        }
    }
}
