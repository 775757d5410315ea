//! # greenlight_api
//!
//! HTTP API library for Greenlight.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod services;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post, put};
use greenlight_core::auth::permissions::{MOVIES_READ, MOVIES_WRITE, PermissionGate};
use greenlight_core::auth::tokens::TokenStore;
use greenlight_core::clock::Clock;
use greenlight_core::data::{
    MovieRepository, PermissionRepository, StoreStats, TokenRepository, UserRepository,
};
use greenlight_core::lifecycle::{DrainOutcome, LifecycleCoordinator};
use greenlight_core::mailer::Mailer;
use greenlight_core::pipeline::{Access, RequestPipeline};
use greenlight_core::ratelimit::RateLimiter;
use greenlight_core::version::VersionGuard;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

use crate::config::ApiConfig;
use crate::handlers::{healthcheck, metrics, movies, tokens, users};
use crate::middleware::admission::{Admission, admit, rate_limit};
use crate::middleware::tracking::track_request;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// API configuration.
    pub config: ApiConfig,
    pub users: Arc<dyn UserRepository>,
    pub movies: Arc<dyn MovieRepository>,
    /// Rate limiter, token store and permission gate.
    pub pipeline: RequestPipeline,
    pub versions: VersionGuard,
    pub lifecycle: LifecycleCoordinator,
    pub mailer: Arc<dyn Mailer>,
    /// Connection counters for `/debug/vars`.
    pub stats: Arc<dyn StoreStats>,
}

impl AppState {
    /// Wire every component over one store that implements all repositories.
    pub fn new<S>(
        config: ApiConfig,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        limiter: Arc<RateLimiter>,
        lifecycle: LifecycleCoordinator,
        mailer: Arc<dyn Mailer>,
    ) -> Self
    where
        S: UserRepository
            + TokenRepository
            + PermissionRepository
            + MovieRepository
            + StoreStats
            + 'static,
    {
        let timeout = config.query_timeout;
        let pipeline = RequestPipeline::new(
            limiter,
            TokenStore::new(store.clone(), clock, timeout),
            PermissionGate::new(store.clone(), timeout),
        );
        Self {
            config,
            users: store.clone(),
            movies: store.clone(),
            stats: store,
            pipeline,
            versions: VersionGuard::new(timeout),
            lifecycle,
            mailer,
        }
    }
}

/// Run embedded database migrations.
///
/// Delegates to `greenlight_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    greenlight_core::migrate::migrate(pool).await
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Builds the Axum router with all routes and shared state.
///
/// Every request, matched or not, is tracked by the lifecycle coordinator and
/// then rate limited. Each route group adds its own authentication and
/// authorization requirement on top.
pub fn router(state: AppState) -> Router {
    // Anyone, but a presented token must still be valid.
    let public = Router::new()
        .route("/v1/healthcheck", get(healthcheck::healthcheck))
        .route("/debug/vars", get(metrics::metrics_handler))
        .route("/v1/users", post(users::register_handler))
        .route("/v1/users/activated", put(users::activate_handler))
        .route(
            "/v1/tokens/activation",
            post(tokens::create_activation_token_handler),
        )
        .route(
            "/v1/tokens/authentication",
            post(tokens::create_authentication_token_handler),
        )
        .route_layer(from_fn_with_state(
            Admission::new(&state, Access::Public),
            admit,
        ));

    let authenticated = Router::new()
        .route(
            "/v1/tokens/authentication",
            delete(tokens::delete_authentication_tokens_handler),
        )
        .route_layer(from_fn_with_state(
            Admission::new(&state, Access::Authenticated),
            admit,
        ));

    let movies_read = Router::new()
        .route("/v1/movies/{id}", get(movies::show_movie_handler))
        .route_layer(from_fn_with_state(
            Admission::new(&state, Access::Permission(MOVIES_READ)),
            admit,
        ));

    let movies_write = Router::new()
        .route("/v1/movies", post(movies::create_movie_handler))
        .route(
            "/v1/movies/{id}",
            patch(movies::update_movie_handler).delete(movies::delete_movie_handler),
        )
        .route_layer(from_fn_with_state(
            Admission::new(&state, Access::Permission(MOVIES_WRITE)),
            admit,
        ));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .merge(movies_read)
        .merge(movies_write)
        .layer(from_fn_with_state(state.pipeline.clone(), rate_limit))
        .layer(from_fn_with_state(state.lifecycle.clone(), track_request))
        .layer(cors_layer(&state.config.cors_trusted_origins))
        .with_state(state)
}

/// Serve `app` on `listener` until the coordinator starts draining, then
/// drain and stop.
///
/// The listener stops accepting as soon as draining begins. In-flight
/// requests, background tasks and closing connections share one shutdown
/// deadline; if it elapses the server task is aborted.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    lifecycle: LifecycleCoordinator,
) -> std::io::Result<DrainOutcome> {
    let addr = listener.local_addr()?;
    let mut server = tokio::spawn(
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(lifecycle.drain_started())
        .into_future(),
    );
    info!(%addr, "listening");

    tokio::select! {
        biased;
        _ = lifecycle.drain_started() => {}
        joined = &mut server => {
            // The server only returns on its own after an I/O failure.
            return match joined {
                Ok(Ok(())) => Err(std::io::Error::other("server exited before shutdown")),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(std::io::Error::other(e)),
            };
        }
    }

    info!(%addr, "stopped accepting connections");
    let deadline = tokio::time::Instant::now() + lifecycle.shutdown_timeout();
    let outcome = lifecycle.shutdown().await;

    if outcome.is_clean() {
        match tokio::time::timeout_at(deadline, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!("server error during shutdown: {e}"),
            Ok(Err(e)) => error!("server task failed: {e}"),
            Err(_) => {
                warn!("connections still open after drain, aborting server");
                server.abort();
            }
        }
    } else {
        server.abort();
    }
    Ok(outcome)
}
