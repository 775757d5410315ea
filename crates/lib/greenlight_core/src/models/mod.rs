//! Domain models shared by storage, the admission core and the HTTP layer.

pub mod auth;
pub mod movie;
