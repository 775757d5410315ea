//! Optimistic concurrency control for mutable records.
//!
//! Every successful write bumps `version` by exactly one. A write carrying a
//! version that is no longer current is refused with
//! [`DataError::EditConflict`]; the guard never retries on its own.

use std::time::Duration;

use tracing::debug;

use crate::data::{DataError, VersionedRepository, bounded};
use crate::models::auth::User;
use crate::models::movie::Movie;

/// A record carrying an integer version stamp.
pub trait Versioned: Clone {
    fn id(&self) -> i64;
    fn version(&self) -> i32;
    fn set_version(&mut self, version: i32);
}

impl Versioned for Movie {
    fn id(&self) -> i64 {
        self.id
    }
    fn version(&self) -> i32 {
        self.version
    }
    fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

impl Versioned for User {
    fn id(&self) -> i64 {
        self.id
    }
    fn version(&self) -> i32 {
        self.version
    }
    fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

/// Applies a mutation to a record only if the caller saw its current version.
#[derive(Debug, Clone, Copy)]
pub struct VersionGuard {
    timeout: Duration,
}

impl Default for VersionGuard {
    fn default() -> Self {
        Self::new(crate::data::DEFAULT_QUERY_TIMEOUT)
    }
}

impl VersionGuard {
    /// `timeout` bounds each storage round trip.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Load record `id`, apply `mutate` to a copy and persist it with a
    /// conditional update against `presented_version`.
    ///
    /// A zero-row update is disambiguated with an existence check: a record
    /// deleted in the meantime yields `NotFound`, anything else `EditConflict`.
    pub async fn check_and_apply<R, S, E, F>(
        &self,
        store: &S,
        id: i64,
        presented_version: i32,
        mutate: F,
    ) -> Result<R, E>
    where
        R: Versioned + Send + Sync + 'static,
        S: VersionedRepository<R> + ?Sized,
        E: From<DataError>,
        F: FnOnce(&mut R) -> Result<(), E>,
    {
        let current = bounded("versioned fetch", self.timeout, store.fetch(id))
            .await?
            .ok_or(DataError::NotFound)?;

        if current.version() != presented_version {
            debug!(
                id,
                presented_version,
                current_version = current.version(),
                "stale version presented"
            );
            return Err(DataError::EditConflict.into());
        }

        let mut next = current;
        mutate(&mut next)?;

        let updated = bounded(
            "versioned update",
            self.timeout,
            store.update_if_version(&next, presented_version),
        )
        .await?;

        match updated {
            Some(version) => {
                next.set_version(version);
                Ok(next)
            }
            None => {
                let exists = bounded("existence check", self.timeout, store.exists(id)).await?;
                if exists {
                    debug!(id, presented_version, "lost update race");
                    Err(DataError::EditConflict.into())
                } else {
                    Err(DataError::NotFound.into())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::data::MovieRepository;
    use crate::data::memory::MemoryStore;

    fn movie() -> Movie {
        Movie {
            id: 0,
            created_at: Utc::now(),
            title: "Moana".into(),
            year: 2016,
            runtime: 107,
            genres: vec!["animation".into(), "adventure".into()],
            version: 0,
        }
    }

    #[tokio::test]
    async fn successful_update_bumps_version_by_one() {
        let store = MemoryStore::new();
        let stored = store.insert_movie(&movie()).await.unwrap();
        assert_eq!(stored.version, 1);

        let updated: Movie = VersionGuard::default()
            .check_and_apply(&store, stored.id, 1, |m: &mut Movie| {
                m.title = "Moana (2016)".into();
                Ok::<_, DataError>(())
            })
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.title, "Moana (2016)");
    }

    #[tokio::test]
    async fn stale_version_is_an_edit_conflict() {
        let store = MemoryStore::new();
        let stored = store.insert_movie(&movie()).await.unwrap();

        let err = VersionGuard::default()
            .check_and_apply(&store, stored.id, 7, |_: &mut Movie| Ok::<_, DataError>(()))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::EditConflict));
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let store = MemoryStore::new();
        let err = VersionGuard::default()
            .check_and_apply(&store, 99, 1, |_: &mut Movie| Ok::<_, DataError>(()))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::NotFound));
    }

    #[tokio::test]
    async fn mutation_error_aborts_without_writing() {
        let store = MemoryStore::new();
        let stored = store.insert_movie(&movie()).await.unwrap();

        let err = VersionGuard::default()
            .check_and_apply(&store, stored.id, 1, |_: &mut Movie| {
                Err(DataError::Internal("invalid".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Internal(_)));

        let current: Movie = VersionedRepository::<Movie>::fetch(&store, stored.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_on_same_version_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let stored = store.insert_movie(&movie()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..2 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                VersionGuard::default()
                    .check_and_apply(store.as_ref(), stored.id, 1, move |m: &mut Movie| {
                        m.title = format!("writer {i}");
                        Ok::<_, DataError>(())
                    })
                    .await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(m) => {
                    assert_eq!(m.version, 2);
                    wins += 1;
                }
                Err(DataError::EditConflict) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((wins, conflicts), (1, 1));
    }

    /// Record vanishes between the fetch and the conditional update.
    struct VanishingStore;

    #[async_trait]
    impl VersionedRepository<Movie> for VanishingStore {
        async fn fetch(&self, _id: i64) -> Result<Option<Movie>, DataError> {
            Ok(Some(Movie {
                id: 5,
                version: 3,
                ..movie()
            }))
        }
        async fn exists(&self, _id: i64) -> Result<bool, DataError> {
            Ok(false)
        }
        async fn update_if_version(&self, _: &Movie, _: i32) -> Result<Option<i32>, DataError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn zero_rows_on_deleted_record_is_not_found() {
        let err = VersionGuard::default()
            .check_and_apply(&VanishingStore, 5, 3, |_: &mut Movie| Ok::<_, DataError>(()))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::NotFound));
    }

    /// Another writer bumps the row between our fetch and our conditional update.
    #[derive(Default)]
    struct RacedStore {
        updates: AtomicUsize,
        existence_checks: AtomicUsize,
    }

    #[async_trait]
    impl VersionedRepository<Movie> for RacedStore {
        async fn fetch(&self, _id: i64) -> Result<Option<Movie>, DataError> {
            Ok(Some(Movie {
                id: 7,
                version: 3,
                ..movie()
            }))
        }
        async fn exists(&self, _id: i64) -> Result<bool, DataError> {
            self.existence_checks.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
        async fn update_if_version(&self, _: &Movie, expected: i32) -> Result<Option<i32>, DataError> {
            assert_eq!(expected, 3);
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn zero_rows_on_existing_record_is_an_edit_conflict() {
        let store = RacedStore::default();
        let err = VersionGuard::default()
            .check_and_apply(&store, 7, 3, |m: &mut Movie| {
                m.title = "Moana 2".into();
                Ok::<_, DataError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::EditConflict));
        assert_eq!(store.updates.load(Ordering::SeqCst), 1);
        assert_eq!(store.existence_checks.load(Ordering::SeqCst), 1);
    }
}
