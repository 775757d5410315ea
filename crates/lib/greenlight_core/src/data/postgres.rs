//! PostgreSQL-backed repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{
    DataError, MovieRepository, PermissionRepository, PoolStats, StoreStats, TokenRepository,
    UserRepository, VersionedRepository,
};
use crate::models::auth::{NewUser, TokenRecord, TokenScope, User};
use crate::models::movie::Movie;

type UserRow = (i64, DateTime<Utc>, String, String, String, bool, i32);
type MovieRow = (i64, DateTime<Utc>, String, i32, i32, Vec<String>, i32);

const USER_COLUMNS: &str = "u.id, u.created_at, u.name, u.email, u.password_hash, u.activated, u.version";

fn user_from_row(
    (id, created_at, name, email, password_hash, activated, version): UserRow,
) -> User {
    User {
        id,
        created_at,
        name,
        email,
        password_hash,
        activated,
        version,
    }
}

fn movie_from_row((id, created_at, title, year, runtime, genres, version): MovieRow) -> Movie {
    Movie {
        id,
        created_at,
        title,
        year,
        runtime,
        genres,
        version,
    }
}

/// Map a unique-constraint violation on `users.email` to [`DataError::DuplicateEmail`].
fn map_user_write_error(e: sqlx::Error) -> DataError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => DataError::DuplicateEmail,
        _ => DataError::Db(e),
    }
}

/// All repositories over a single connection pool.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl StoreStats for PgStore {
    fn pool_stats(&self) -> Option<PoolStats> {
        Some(PoolStats {
            max_open_connections: self.pool.options().get_max_connections(),
            open_connections: self.pool.size(),
            idle_connections: self.pool.num_idle(),
        })
    }
}

#[async_trait]
impl VersionedRepository<User> for PgStore {
    async fn fetch(&self, id: i64) -> Result<Option<User>, DataError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn exists(&self, id: i64) -> Result<bool, DataError> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn update_if_version(&self, user: &User, expected: i32) -> Result<Option<i32>, DataError> {
        let version = sqlx::query_scalar::<_, i32>(
            "UPDATE users \
             SET name = $1, email = $2, password_hash = $3, activated = $4, version = version + 1 \
             WHERE id = $5 AND version = $6 \
             RETURNING version",
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.activated)
        .bind(user.id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_user_write_error)?;
        Ok(version)
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn insert_user(&self, user: NewUser) -> Result<User, DataError> {
        let (id, created_at, version) = sqlx::query_as::<_, (i64, DateTime<Utc>, i32)>(
            "INSERT INTO users (name, email, password_hash, activated) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, created_at, version",
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.activated)
        .fetch_one(&self.pool)
        .await
        .map_err(map_user_write_error)?;

        Ok(User {
            id,
            created_at,
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            activated: user.activated,
            version,
        })
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, DataError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn replace_tokens(&self, record: &TokenRecord) -> Result<(), DataError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM tokens WHERE expiry <= $1")
            .bind(record.issued_at())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM tokens WHERE user_id = $1 AND scope = $2")
            .bind(record.user_id)
            .bind(record.scope.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO tokens (hash, user_id, expiry, scope) VALUES ($1, $2, $3, $4)")
            .bind(&record.fingerprint)
            .bind(record.user_id)
            .bind(record.expiry)
            .bind(record.scope.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_tokens_for_user(
        &self,
        user_id: i64,
        scope: TokenScope,
    ) -> Result<u64, DataError> {
        let result = sqlx::query("DELETE FROM tokens WHERE user_id = $1 AND scope = $2")
            .bind(user_id)
            .bind(scope.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn user_for_token(
        &self,
        fingerprint: &[u8],
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, DataError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} \
             FROM users u \
             INNER JOIN tokens t ON u.id = t.user_id \
             WHERE t.hash = $1 AND t.scope = $2 AND t.expiry > $3"
        ))
        .bind(fingerprint)
        .bind(scope.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }
}

#[async_trait]
impl PermissionRepository for PgStore {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Vec<String>, DataError> {
        let codes = sqlx::query_scalar::<_, String>(
            "SELECT p.code \
             FROM users_permissions up \
             INNER JOIN permissions p ON up.permission_id = p.id \
             WHERE up.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(codes)
    }

    async fn add_permissions_for_user(
        &self,
        user_id: i64,
        codes: &[&str],
    ) -> Result<(), DataError> {
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        sqlx::query(
            "INSERT INTO users_permissions (user_id, permission_id) \
             SELECT $1, p.id FROM permissions p WHERE p.code = ANY($2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(codes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VersionedRepository<Movie> for PgStore {
    async fn fetch(&self, id: i64) -> Result<Option<Movie>, DataError> {
        if id < 1 {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, MovieRow>(
            "SELECT id, created_at, title, year, runtime, genres, version \
             FROM movies WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(movie_from_row))
    }

    async fn exists(&self, id: i64) -> Result<bool, DataError> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM movies WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn update_if_version(
        &self,
        movie: &Movie,
        expected: i32,
    ) -> Result<Option<i32>, DataError> {
        let version = sqlx::query_scalar::<_, i32>(
            "UPDATE movies \
             SET title = $1, year = $2, runtime = $3, genres = $4, version = version + 1 \
             WHERE id = $5 AND version = $6 \
             RETURNING version",
        )
        .bind(&movie.title)
        .bind(movie.year)
        .bind(movie.runtime)
        .bind(&movie.genres)
        .bind(movie.id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;
        Ok(version)
    }
}

#[async_trait]
impl MovieRepository for PgStore {
    async fn insert_movie(&self, movie: &Movie) -> Result<Movie, DataError> {
        let (id, created_at, version) = sqlx::query_as::<_, (i64, DateTime<Utc>, i32)>(
            "INSERT INTO movies (title, year, runtime, genres) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, created_at, version",
        )
        .bind(&movie.title)
        .bind(movie.year)
        .bind(movie.runtime)
        .bind(&movie.genres)
        .fetch_one(&self.pool)
        .await?;

        Ok(Movie {
            id,
            created_at,
            version,
            ..movie.clone()
        })
    }

    async fn delete_movie(&self, id: i64) -> Result<(), DataError> {
        if id < 1 {
            return Err(DataError::NotFound);
        }
        let result = sqlx::query("DELETE FROM movies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound);
        }
        Ok(())
    }
}
