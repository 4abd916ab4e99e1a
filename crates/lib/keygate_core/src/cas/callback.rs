//! Proxy-granting ticket delivery to the service's `pgtUrl`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// PGT callback failure.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Callback request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Callback rejected: {0}")]
    Rejected(String),
}

/// Pushes `(pgtId, pgtIou)` to the proxy callback URL.
#[async_trait]
pub trait PgtCallback: Send + Sync {
    async fn deliver(&self, pgt_url: &Url, pgt_id: &str, pgt_iou: &str) -> Result<(), CallbackError>;
}

/// `GET pgtUrl?pgtId=..&pgtIou=..`, expecting a 2xx answer.
#[derive(Clone)]
pub struct HttpPgtCallback {
    client: reqwest::Client,
}

impl HttpPgtCallback {
    pub fn new(timeout: Duration) -> Result<Self, CallbackError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PgtCallback for HttpPgtCallback {
    async fn deliver(&self, pgt_url: &Url, pgt_id: &str, pgt_iou: &str) -> Result<(), CallbackError> {
        let resp = self
            .client
            .get(pgt_url.clone())
            .query(&[("pgtId", pgt_id), ("pgtIou", pgt_iou)])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CallbackError::Rejected(format!("status {status}")));
        }
        debug!(url = %pgt_url, "pgt delivered");
        Ok(())
    }
}
