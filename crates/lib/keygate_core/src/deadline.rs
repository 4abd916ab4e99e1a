//! Bounded external calls.
//!
//! Every round trip to the session cache or the relational store goes
//! through [`within`], so a stalled backend fails the operation instead of
//! holding the request open. Dropping the returned future cancels the
//! underlying call.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// The deadline for an external call elapsed.
#[derive(Debug, Clone, Copy, Error)]
#[error("operation timed out after {0:?}")]
pub struct DeadlineExceeded(pub Duration);

/// Run `fut`, failing with [`DeadlineExceeded`] once `limit` elapses.
pub async fn within<F, T, E>(limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<DeadlineExceeded>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DeadlineExceeded(limit).into()),
    }
}
