//! Request middleware.

pub mod admission;
pub mod tracking;
