//! Greenlight API server binary.
//!
//! Exits 0 after a clean drain, 1 when startup fails or the drain deadline
//! elapses with work still outstanding.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use greenlight_api::AppState;
use greenlight_api::config::ApiConfig;
use greenlight_core::clock::{Clock, SystemClock};
use greenlight_core::data::postgres::PgStore;
use greenlight_core::lifecycle::{DrainOutcome, LifecycleCoordinator};
use greenlight_core::mailer::LogMailer;
use greenlight_core::ratelimit::{
    DEFAULT_SWEEP_INTERVAL, LimiterConfig, LimiterConfigError, RateLimiter,
};
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

const DEFAULT_LOG_FILTER: &str = "info,greenlight_api=debug,greenlight_core=debug";

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "greenlight_server", about = "Greenlight movie catalog API", version)]
struct Args {
    /// API server port.
    #[arg(long, env = "PORT", default_value_t = 4000)]
    port: u16,

    /// Operating environment.
    #[arg(long = "env", env = "GREENLIGHT_ENV", value_enum, default_value_t = Environment::Development)]
    environment: Environment,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Maximum number of open database connections.
    #[arg(long, default_value_t = 25)]
    db_max_connections: u32,

    /// Seconds a pooled connection may sit idle before being closed.
    #[arg(long, default_value_t = 900)]
    db_max_idle_time_secs: u64,

    /// Sustained requests per second allowed per client.
    #[arg(long, default_value_t = 2.0)]
    limiter_rps: f64,

    /// Requests a client may burst above the sustained rate.
    #[arg(long, default_value_t = 4)]
    limiter_burst: u32,

    /// Enable the per-client rate limiter.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    limiter_enabled: bool,

    /// Trusted CORS origins (space separated).
    #[arg(long, value_delimiter = ' ', num_args = 0..)]
    cors_trusted_origins: Vec<String>,

    /// Hard deadline for draining in-flight work on shutdown.
    #[arg(long, default_value_t = 30)]
    shutdown_timeout_secs: u64,

    /// Deadline for each storage round trip and mail delivery attempt.
    #[arg(long, default_value_t = 3)]
    query_timeout_secs: u64,

    /// Sender address for outgoing email.
    #[arg(
        long,
        env = "SMTP_SENDER",
        default_value = "Greenlight <no-reply@greenlight.local>"
    )]
    smtp_sender: String,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error("invalid configuration: {0}")]
    Limiter(#[from] LimiterConfigError),

    #[error("invalid configuration: {0}")]
    Argument(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Args {
    fn limiter_config(&self) -> Result<LimiterConfig, StartupError> {
        let config = LimiterConfig {
            rps: self.limiter_rps,
            burst: self.limiter_burst,
            enabled: self.limiter_enabled,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), StartupError> {
        if self.query_timeout_secs == 0 {
            return Err(StartupError::Argument(
                "query timeout must be at least 1 second".into(),
            ));
        }
        if self.db_max_connections == 0 {
            return Err(StartupError::Argument(
                "database pool needs at least 1 connection".into(),
            ));
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<DrainOutcome, StartupError> {
    args.validate()?;
    let limiter_config = args.limiter_config()?;
    let query_timeout = Duration::from_secs(args.query_timeout_secs);

    info!(
        port = args.port,
        env = args.environment.as_str(),
        limiter_rps = limiter_config.rps,
        limiter_burst = limiter_config.burst,
        limiter_enabled = limiter_config.enabled,
        "starting greenlight_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(args.db_max_connections)
        .idle_timeout(Duration::from_secs(args.db_max_idle_time_secs))
        .acquire_timeout(Duration::from_secs(30))
        .connect(&args.database_url)
        .await?;
    info!(
        max_connections = args.db_max_connections,
        "database connection pool established"
    );

    greenlight_api::migrate(&pool).await?;

    let lifecycle = LifecycleCoordinator::new(Duration::from_secs(args.shutdown_timeout_secs));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let limiter = Arc::new(RateLimiter::new(limiter_config, clock.clone()));
    let sweeper = limiter.spawn_sweeper(DEFAULT_SWEEP_INTERVAL, lifecycle.drain_token());
    lifecycle.register_cleanup("rate limiter sweeper", async move {
        let _ = sweeper.await;
    });

    let store = Arc::new(PgStore::new(pool.clone()));
    lifecycle.register_cleanup("database pool", async move {
        pool.close().await;
    });

    let config = ApiConfig {
        env: args.environment.as_str().into(),
        cors_trusted_origins: args.cors_trusted_origins,
        query_timeout,
    };
    let state = AppState::new(
        config,
        store,
        clock,
        limiter,
        lifecycle.clone(),
        Arc::new(LogMailer::new(args.smtp_sender)),
    );
    let app = greenlight_api::router(state);

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    lifecycle.listen_for_signals();

    let outcome = greenlight_api::serve(listener, app, lifecycle).await?;
    Ok(outcome)
}
