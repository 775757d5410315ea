//! Process lifecycle: request tracking, background work and graceful drain.
//!
//! The coordinator moves through `Running -> Draining -> Stopped`. Every
//! in-flight HTTP request and every background task holds an
//! [`InFlightGuard`]; shutdown waits until the last guard is dropped or the
//! drain deadline elapses, then runs the registered cleanups in order.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default hard deadline for draining in-flight work.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Accepting requests and background work.
    Running = 0,
    /// Refusing new requests; existing requests and background tasks finish.
    Draining = 1,
    /// Drain finished (or was abandoned) and resources were released.
    Stopped = 2,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Draining => f.write_str("draining"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// How the drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every tracked unit of work completed.
    Clean,
    /// The deadline elapsed with work still outstanding.
    TimedOut { outstanding: usize },
}

impl DrainOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, DrainOutcome::Clean)
    }

    /// Process exit status: 0 for a clean drain, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            DrainOutcome::Clean => 0,
            DrainOutcome::TimedOut { .. } => 1,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("server is shutting down")]
    ShuttingDown,
}

type Cleanup = (String, BoxFuture<'static, ()>);

struct Inner {
    phase: AtomicU8,
    in_flight: AtomicUsize,
    idle: Notify,
    drain: CancellationToken,
    shutdown_timeout: Duration,
    cleanups: Mutex<Vec<Cleanup>>,
}

/// Tracks outstanding work and orchestrates shutdown.
#[derive(Clone)]
pub struct LifecycleCoordinator {
    inner: Arc<Inner>,
}

/// One unit of outstanding work. Dropping it decrements the counter exactly once.
#[must_use = "work is only tracked while the guard is alive"]
pub struct InFlightGuard {
    inner: Arc<Inner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl Default for LifecycleCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}

impl LifecycleCoordinator {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                phase: AtomicU8::new(Phase::Running as u8),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                drain: CancellationToken::new(),
                shutdown_timeout,
                cleanups: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.inner.phase.load(Ordering::SeqCst))
    }

    /// Requests plus background tasks currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.inner.shutdown_timeout
    }

    fn acquire(&self) -> InFlightGuard {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Admit an inbound request. Refused once draining has started.
    ///
    /// The counter is bumped before the phase is read, so a request that
    /// slips past the check is always visible to a concurrent drain.
    pub fn track_request(&self) -> Result<InFlightGuard, LifecycleError> {
        let guard = self.acquire();
        if self.phase() != Phase::Running {
            return Err(LifecycleError::ShuttingDown);
        }
        Ok(guard)
    }

    /// Run `task` in the background under shutdown tracking.
    ///
    /// Accepted while `Running` or `Draining` (a request that is still
    /// finishing may schedule follow-up work); refused once `Stopped`. A panic
    /// inside `task` is caught and logged.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> Result<JoinHandle<()>, LifecycleError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.acquire();
        if self.phase() == Phase::Stopped {
            return Err(LifecycleError::ShuttingDown);
        }

        Ok(tokio::spawn(async move {
            let _guard = guard;
            if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                error!(task = name, panic = %panic_message(panic.as_ref()), "background task panicked");
            }
        }))
    }

    /// Register a resource release to run, in registration order, when stopping.
    pub fn register_cleanup<F>(&self, name: impl Into<String>, cleanup: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .cleanups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.into(), Box::pin(cleanup)));
    }

    /// Move from `Running` to `Draining`. Returns false if already past `Running`.
    pub fn begin_drain(&self) -> bool {
        let switched = self
            .inner
            .phase
            .compare_exchange(
                Phase::Running as u8,
                Phase::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if switched {
            info!(in_flight = self.in_flight(), "shutdown started, draining in-flight work");
            self.inner.drain.cancel();
        }
        switched
    }

    /// Resolves once draining has begun. Suitable for `with_graceful_shutdown`.
    pub fn drain_started(&self) -> impl Future<Output = ()> + Send + 'static {
        let token = self.inner.drain.clone();
        async move { token.cancelled().await }
    }

    /// Token cancelled when draining begins, for stopping auxiliary loops.
    pub fn drain_token(&self) -> CancellationToken {
        self.inner.drain.clone()
    }

    /// Wait until no work is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Drain and stop: begin draining (if not already), wait for outstanding
    /// work up to the shutdown deadline, run cleanups, enter `Stopped`.
    pub async fn shutdown(&self) -> DrainOutcome {
        self.begin_drain();

        let outcome = match tokio::time::timeout(self.inner.shutdown_timeout, self.wait_idle()).await
        {
            Ok(()) => {
                info!("drain complete");
                DrainOutcome::Clean
            }
            Err(_) => {
                let outstanding = self.in_flight();
                warn!(
                    outstanding,
                    timeout = ?self.inner.shutdown_timeout,
                    "drain deadline elapsed, abandoning outstanding work"
                );
                DrainOutcome::TimedOut { outstanding }
            }
        };

        self.run_cleanups().await;
        self.inner
            .phase
            .store(Phase::Stopped as u8, Ordering::SeqCst);
        info!(clean = outcome.is_clean(), "stopped");
        outcome
    }

    async fn run_cleanups(&self) {
        let cleanups = std::mem::take(
            &mut *self
                .inner
                .cleanups
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (name, cleanup) in cleanups {
            info!(resource = %name, "releasing");
            cleanup.await;
        }
    }

    /// Begin draining when the process receives SIGINT or SIGTERM.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let signal = termination_signal().await;
            info!(signal, "caught signal");
            coordinator.begin_drain();
        })
    }
}

/// Resolves with the signal name on interrupt or terminate.
pub async fn termination_signal() -> &'static str {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for interrupt: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to listen for terminate: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
