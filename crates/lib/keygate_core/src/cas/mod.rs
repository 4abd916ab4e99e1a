//! CAS ticket lifecycle and protocol documents.
//!
//! Tickets move `issued → consumed` or `issued → expired`; both are
//! terminal. [`manager::TicketManager`] is the only way in or out.

pub mod callback;
pub mod manager;
pub mod queries;
pub mod response;
pub mod store;
pub mod ticket;

use thiserror::Error;

use crate::store::StoreError;

/// CAS errors.
#[derive(Debug, Error)]
pub enum CasError {
    /// Unknown, expired, already used, wrong kind or wrong service.
    #[error("Ticket is invalid")]
    TicketInvalid,

    #[error("Service is not registered: {0}")]
    ServiceNotRegistered(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid proxy callback: {0}")]
    InvalidProxyCallback(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
