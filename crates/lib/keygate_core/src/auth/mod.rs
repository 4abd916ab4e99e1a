//! Authentication: credential checks, lockout, OTP and JWT issuance.
//!
//! Every entry point (password API, CAS login, SAML SSO) authenticates
//! through [`authenticator::Authenticator`], so lockout accounting is the
//! same regardless of protocol.

pub mod authenticator;
pub mod jwt;
pub mod lockout;
pub mod otp;
pub mod password;
pub mod queries;
pub mod store;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::store::StoreError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("Account inactive")]
    AccountInactive,

    #[error("One-time password required")]
    OtpRequired,

    #[error("Invalid one-time password")]
    InvalidOtp,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Session expired")]
    SessionExpired,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}
