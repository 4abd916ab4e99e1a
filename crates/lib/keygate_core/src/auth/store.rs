//! Credential store contract and its in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::lockout::{FailureOutcome, LockoutPolicy};
use crate::models::auth::Principal;
use crate::store::StoreError;

/// Lookup and write-back contract for principals.
///
/// The IdP only reads identities; the single mutations are the failure
/// counter / lock and last-login metadata.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find by username, falling back to email.
    async fn find_by_login(&self, login: &str) -> Result<Option<Principal>, StoreError>;

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Principal>, StoreError>;

    /// Count one failed attempt at `at` and apply `policy` in the same
    /// atomic step. Returns the stored state, or `None` for an unknown user.
    async fn record_failure(
        &self,
        user_id: &str,
        policy: &LockoutPolicy,
        at: DateTime<Utc>,
    ) -> Result<Option<FailureOutcome>, StoreError>;

    /// Reset the failure counter and lock, and stamp last-login metadata.
    async fn record_success(
        &self,
        user_id: &str,
        ip: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Credential store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    principals: DashMap<String, Principal>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a principal.
    pub fn insert(&self, principal: Principal) {
        self.principals.insert(principal.id.clone(), principal);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<Principal>, StoreError> {
        let by_username = self
            .principals
            .iter()
            .find(|p| p.username == login)
            .map(|p| p.value().clone());
        if by_username.is_some() {
            return Ok(by_username);
        }
        Ok(self
            .principals
            .iter()
            .find(|p| p.email.eq_ignore_ascii_case(login))
            .map(|p| p.value().clone()))
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Principal>, StoreError> {
        Ok(self.principals.get(user_id).map(|p| p.value().clone()))
    }

    async fn record_failure(
        &self,
        user_id: &str,
        policy: &LockoutPolicy,
        at: DateTime<Utc>,
    ) -> Result<Option<FailureOutcome>, StoreError> {
        // The entry guard holds the shard lock across read and write.
        let Some(mut p) = self.principals.get_mut(user_id) else {
            return Ok(None);
        };
        let outcome = policy.on_failure(&p, at);
        p.failed_login_count = outcome.failed_count;
        p.locked_until = outcome.locked_until;
        Ok(Some(outcome))
    }

    async fn record_success(
        &self,
        user_id: &str,
        ip: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(mut p) = self.principals.get_mut(user_id) {
            p.failed_login_count = 0;
            p.locked_until = None;
            p.last_login_at = Some(at);
            p.last_login_ip = Some(ip.to_string());
        }
        Ok(())
    }
}
