//! Per-client token-bucket rate limiting.
//!
//! One bucket per client identity, all held in a single table behind one
//! mutex. Lookup, lazy creation, refill and the idle sweep all happen under
//! that lock, so concurrent first requests from the same client share a
//! single bucket. No I/O is done while the lock is held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::Clock;

/// Buckets idle for longer than this are dropped by the sweep.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3 * 60);

/// How often the background sweep runs.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Externally supplied limiter settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterConfig {
    /// Sustained requests per second.
    pub rps: f64,
    /// Bucket capacity.
    pub burst: u32,
    /// When false the pipeline skips the limiter entirely.
    pub enabled: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rps: 2.0,
            burst: 4,
            enabled: true,
        }
    }
}

/// Rejected limiter settings.
#[derive(Debug, Error, PartialEq)]
pub enum LimiterConfigError {
    #[error("limiter rps must be a finite number greater than 0 (got {0})")]
    InvalidRps(f64),

    #[error("limiter burst must be at least 1 (got {0})")]
    InvalidBurst(u32),
}

impl LimiterConfig {
    /// Startup validation: `rps > 0` and `burst >= 1`.
    pub fn validate(&self) -> Result<(), LimiterConfigError> {
        if !self.rps.is_finite() || self.rps <= 0.0 {
            return Err(LimiterConfigError::InvalidRps(self.rps));
        }
        if self.burst < 1 {
            return Err(LimiterConfigError::InvalidBurst(self.burst));
        }
        Ok(())
    }
}

/// The client has no credit left.
#[derive(Debug, Clone, Copy, Error, PartialEq)]
#[error("rate limit exceeded, retry after {retry_after:?}")]
pub struct RateLimited {
    /// Time until one full token is available again.
    pub retry_after: Duration,
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl Bucket {
    fn full(capacity: u32, refill_rate: f64, now: DateTime<Utc>) -> Self {
        Self {
            tokens: f64::from(capacity),
            capacity: f64::from(capacity),
            refill_rate,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        // A clock step backwards counts as no time passing.
        let elapsed = (now - self.last_refill)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Token-bucket admission control keyed by client identity.
pub struct RateLimiter {
    config: LimiterConfig,
    retention: Duration,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_retention(config, clock, DEFAULT_RETENTION)
    }

    pub fn with_retention(config: LimiterConfig, clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            config,
            retention,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Whether callers should consult the limiter at all.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spend one token from `client`'s bucket, creating a full bucket on first sight.
    pub fn check(&self, client: &str) -> Result<(), RateLimited> {
        let now = self.clock.now();
        let mut table = self.table();
        let bucket = table
            .entry(client.to_owned())
            .or_insert_with(|| Bucket::full(self.config.burst, self.config.rps, now));

        bucket.refill(now);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        // Tiny rates can push the wait past what `Duration` holds.
        let retry_after = Duration::try_from_secs_f64((1.0 - bucket.tokens) / bucket.refill_rate)
            .unwrap_or(Duration::MAX);
        drop(table);
        debug!(client, ?retry_after, "rate limited");
        Err(RateLimited { retry_after })
    }

    /// Drop buckets not seen within the retention window. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, bucket| {
            (now - bucket.last_seen)
                .to_std()
                .map(|idle| idle <= self.retention)
                .unwrap_or(true)
        });
        before - table.len()
    }

    /// Run [`Self::sweep`] every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("rate limiter sweeper stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = limiter.len(), "swept idle rate limit buckets");
                        }
                    }
                }
            }
        })
    }
}
