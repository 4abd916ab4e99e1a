//! Server-side sessions and the token blacklist.
//!
//! Layout in the backing cache:
//!
//! | Key                        | Value                             |
//! |----------------------------|-----------------------------------|
//! | `session:{id}`             | JSON [`SessionRecord`], TTL = remaining lifetime |
//! | `user_sessions:{user_id}`  | set of session ids                |
//! | `token_blacklist:{trade}`  | `"revoked"`, TTL = token lifetime |
//!
//! The reverse index may briefly reference records that have expired;
//! every read path prunes such ids, and [`SessionStore::sweep`] does so in
//! bulk.

pub mod cache;
pub mod device;
pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::cache::{Batch, CacheError, SessionCache};
use self::device::DeviceType;
use crate::deadline::within;
use crate::ids::prefixed_token;
use crate::models::auth::{ClientInfo, Principal};

const SESSION_PREFIX: &str = "session:";
const USER_SESSIONS_PREFIX: &str = "user_sessions:";
const BLACKLIST_PREFIX: &str = "token_blacklist:";
const REVOKED: &str = "revoked";

/// Session store errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("Session cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Corrupt session record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A server-side session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub login_ip: String,
    pub user_agent: String,
    pub device_type: DeviceType,
    pub login_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Correlation id of the token pair issued with this session.
    pub token_id: Option<String>,
}

impl SessionRecord {
    /// Time left before absolute expiry, `None` once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

fn session_key(id: &str) -> String {
    format!("{SESSION_PREFIX}{id}")
}

fn user_sessions_key(user_id: &str) -> String {
    format!("{USER_SESSIONS_PREFIX}{user_id}")
}

fn blacklist_key(trade_id: &str) -> String {
    format!("{BLACKLIST_PREFIX}{trade_id}")
}

/// Session store over a [`SessionCache`].
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn SessionCache>,
    timeout: Duration,
    allow_multi_device: bool,
}

impl SessionStore {
    /// `timeout` bounds every round trip to the cache.
    pub fn new(cache: Arc<dyn SessionCache>, timeout: Duration, allow_multi_device: bool) -> Self {
        Self {
            cache,
            timeout,
            allow_multi_device,
        }
    }

    /// Open a session for `principal`.
    ///
    /// The record and its reverse-index entry are written in one atomic
    /// batch. In single-device mode the user's other sessions are removed
    /// in the same batch.
    pub async fn create(
        &self,
        principal: &Principal,
        client: &ClientInfo,
        token_id: Option<&str>,
        ttl: chrono::Duration,
    ) -> Result<SessionRecord, SessionError> {
        let now = Utc::now();
        let record = SessionRecord {
            session_id: prefixed_token("sess-", 32),
            user_id: principal.id.clone(),
            username: principal.username.clone(),
            email: principal.email.clone(),
            display_name: principal.display_name.clone(),
            login_ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            device_type: DeviceType::detect(&client.user_agent),
            login_time: now,
            last_activity: now,
            expires_at: now + ttl,
            token_id: token_id.map(str::to_string),
        };
        let remaining = record.remaining(now).unwrap_or(Duration::from_secs(1));

        let index_key = user_sessions_key(&record.user_id);
        let mut batch = Batch::new();
        if !self.allow_multi_device {
            let existing = within(self.timeout, self.cache.members(&index_key)).await?;
            for id in &existing {
                batch.del(session_key(id));
            }
            batch.del(index_key.clone());
        }
        batch
            .set_ex(session_key(&record.session_id), serde_json::to_string(&record)?, remaining)
            .sadd(index_key.clone(), record.session_id.clone())
            .expire(index_key, remaining);
        within(self.timeout, self.cache.apply(batch)).await?;

        info!(
            user_id = %record.user_id,
            device = ?record.device_type,
            "session created"
        );
        Ok(record)
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        let raw = within(self.timeout, self.cache.get(&session_key(session_id))).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let mut batch = Batch::new();
        batch
            .del(session_key(&record.session_id))
            .srem(user_sessions_key(&record.user_id), record.session_id.clone());
        within(self.timeout, self.cache.apply(batch)).await?;
        Ok(())
    }

    /// Fetch a live session. Expired records are deleted on sight.
    pub async fn get(&self, session_id: &str) -> Result<SessionRecord, SessionError> {
        let record = self.load(session_id).await?.ok_or(SessionError::NotFound)?;
        if Utc::now() > record.expires_at {
            debug!(user_id = %record.user_id, "lazily expiring session");
            self.remove(&record).await?;
            return Err(SessionError::NotFound);
        }
        Ok(record)
    }

    /// Record activity without moving the absolute expiry.
    ///
    /// Writes only if the record still exists, so a touch racing a logout
    /// cannot resurrect the session.
    pub async fn touch(&self, session_id: &str) -> Result<SessionRecord, SessionError> {
        let mut record = self.get(session_id).await?;
        let now = Utc::now();
        let Some(remaining) = record.remaining(now) else {
            self.remove(&record).await?;
            return Err(SessionError::NotFound);
        };
        record.last_activity = now;
        let raw = serde_json::to_string(&record)?;
        let written = within(
            self.timeout,
            self.cache
                .set_existing(&session_key(session_id), &raw, remaining),
        )
        .await?;
        if !written {
            return Err(SessionError::NotFound);
        }
        Ok(record)
    }

    /// Remove a session. Deleting an unknown session is not an error.
    pub async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        if let Some(record) = self.load(session_id).await? {
            self.remove(&record).await?;
            info!(user_id = %record.user_id, "session deleted");
        }
        Ok(())
    }

    /// Live sessions of a user, with dangling index entries pruned.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<SessionRecord>, SessionError> {
        Ok(self.resolve_index(user_id).await?.0)
    }

    async fn resolve_index(
        &self,
        user_id: &str,
    ) -> Result<(Vec<SessionRecord>, usize), SessionError> {
        let index_key = user_sessions_key(user_id);
        let ids = within(self.timeout, self.cache.members(&index_key)).await?;
        let mut live = Vec::with_capacity(ids.len());
        let mut dangling = Batch::new();
        let mut pruned = 0;
        for id in ids {
            match self.get(&id).await {
                Ok(record) => live.push(record),
                Err(SessionError::NotFound) => {
                    dangling.srem(index_key.clone(), id);
                    pruned += 1;
                }
                Err(SessionError::Corrupt(e)) => {
                    warn!(user_id, error = %e, "dropping unreadable session record");
                    dangling.del(session_key(&id)).srem(index_key.clone(), id);
                    pruned += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if !dangling.is_empty() {
            within(self.timeout, self.cache.apply(dangling)).await?;
        }
        live.sort_by_key(|r| r.login_time);
        Ok((live, pruned))
    }

    /// Delete every session of a user present at call time.
    ///
    /// A login that completes concurrently, after the index snapshot, keeps
    /// its session.
    pub async fn force_logout(&self, user_id: &str) -> Result<usize, SessionError> {
        let index_key = user_sessions_key(user_id);
        let ids = within(self.timeout, self.cache.members(&index_key)).await?;
        let mut batch = Batch::new();
        for id in &ids {
            batch
                .del(session_key(id))
                .srem(index_key.clone(), id.clone());
        }
        if !batch.is_empty() {
            within(self.timeout, self.cache.apply(batch)).await?;
        }
        info!(user_id, count = ids.len(), "forced logout");
        Ok(ids.len())
    }

    /// True iff [`Self::get`] would succeed.
    pub async fn is_valid(&self, session_id: &str) -> bool {
        match self.get(session_id).await {
            Ok(_) => true,
            Err(SessionError::NotFound) => false,
            Err(e) => {
                warn!(error = %e, "session lookup failed");
                false
            }
        }
    }

    /// Revoke tokens carrying `trade_id` for `ttl`. Non-positive TTLs are a no-op.
    pub async fn blacklist(&self, trade_id: &str, ttl: chrono::Duration) -> Result<(), SessionError> {
        let Some(ttl) = ttl.to_std().ok().filter(|d| !d.is_zero()) else {
            return Ok(());
        };
        within(
            self.timeout,
            self.cache.set_ex(&blacklist_key(trade_id), REVOKED, ttl),
        )
        .await?;
        debug!(trade_id, "token blacklisted");
        Ok(())
    }

    pub async fn is_blacklisted(&self, trade_id: &str) -> Result<bool, SessionError> {
        Ok(within(self.timeout, self.cache.exists(&blacklist_key(trade_id))).await?)
    }

    /// Prune dangling reverse-index entries for every user.
    pub async fn sweep(&self) -> Result<usize, SessionError> {
        let keys = within(
            self.timeout,
            self.cache.keys_with_prefix(USER_SESSIONS_PREFIX),
        )
        .await?;
        let mut pruned = 0;
        for key in keys {
            if let Some(user_id) = key.strip_prefix(USER_SESSIONS_PREFIX) {
                pruned += self.resolve_index(user_id).await?.1;
            }
        }
        Ok(pruned)
    }

    /// Run [`Self::sweep`] every `interval` until `shutdown` is cancelled.
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => match store.sweep().await {
                        Ok(0) => {}
                        Ok(pruned) => info!(pruned, "session sweep pruned dangling entries"),
                        Err(e) => warn!(error = %e, "session sweep failed"),
                    },
                }
            }
        })
    }
}
