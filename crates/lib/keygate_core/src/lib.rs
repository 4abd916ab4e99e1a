//! # keygate_core
//!
//! Core domain logic for Keygate: token issuance, server-side sessions,
//! CAS ticket lifecycle and SAML assertion signing.

pub mod apps;
pub mod attributes;
pub mod auth;
pub mod cas;
pub mod config;
pub mod deadline;
pub mod ids;
pub mod migrate;
pub mod models;
pub mod saml;
pub mod session;
pub mod store;
pub mod xml;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
