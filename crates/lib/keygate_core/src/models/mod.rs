//! Domain models shared across the token, session and protocol layers.

pub mod application;
pub mod auth;
