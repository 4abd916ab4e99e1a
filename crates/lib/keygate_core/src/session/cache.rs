//! Backing cache contract for sessions and the token blacklist.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::deadline::DeadlineExceeded;

/// Session cache failures.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Timeout(#[from] DeadlineExceeded),
}

/// One write inside an atomic [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    SetEx {
        key: String,
        value: String,
        ttl: Duration,
    },
    Del {
        key: String,
    },
    SAdd {
        key: String,
        member: String,
    },
    SRem {
        key: String,
        member: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

/// Writes applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<CacheOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ex(&mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> &mut Self {
        self.ops.push(CacheOp::SetEx {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(CacheOp::Del { key: key.into() });
        self
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(CacheOp::SAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn srem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(CacheOp::SRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.ops.push(CacheOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[CacheOp] {
        &self.ops
    }
}

/// Key/value + set cache with expiry (Redis semantics).
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Overwrite a live key; returns `false` (and writes nothing) when absent.
    async fn set_existing(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, CacheError>;

    /// Members of a set; empty when the key is missing.
    async fn members(&self, key: &str) -> Result<Vec<String>, CacheError>;

    /// Live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    /// Apply every operation atomically.
    async fn apply(&self, batch: Batch) -> Result<(), CacheError>;
}
