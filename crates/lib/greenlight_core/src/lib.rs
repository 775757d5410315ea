//! # greenlight_core
//!
//! Request admission and trust core for the Greenlight API: opaque tokens,
//! permissions, per-client rate limiting, optimistic concurrency and
//! lifecycle-aware background work.

pub mod auth;
pub mod clock;
pub mod data;
pub mod lifecycle;
pub mod mailer;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod ratelimit;
pub mod version;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
