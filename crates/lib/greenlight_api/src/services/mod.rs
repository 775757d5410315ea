//! Business logic shared by the handlers.

pub mod accounts;
pub mod mail;
