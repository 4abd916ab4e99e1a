//! Relational store errors shared by the credential, application and
//! ticket stores.

use thiserror::Error;

use crate::deadline::DeadlineExceeded;

/// Persistent store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Timeout(#[from] DeadlineExceeded),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}
