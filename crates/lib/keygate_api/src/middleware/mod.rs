//! Axum middleware.

pub mod auth;
