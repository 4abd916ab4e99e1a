//! Request-independent helpers shared by the handlers.

pub mod auth;
pub mod client;
pub mod cookies;
