//! Request handlers.

pub mod healthcheck;
pub mod metrics;
pub mod movies;
pub mod tokens;
pub mod users;
