//! PostgreSQL credential store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::lockout::{FailureOutcome, LockoutPolicy};
use super::store::CredentialStore;
use crate::deadline::within;
use crate::models::auth::{AccountStatus, Principal};
use crate::store::StoreError;

type UserRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    i32,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<DateTime<Utc>>,
    Option<String>,
);

const USER_COLUMNS: &str = "id::text, username, email, display_name, password_hash, status, \
     failed_login_count, locked_until, otp_secret, last_login_at, last_login_ip";

/// `$2` attempt time, `$3` threshold, `$4` lock expiry for a new lock.
/// An elapsed lock restarts the count; an active lock is kept as is.
const RECORD_FAILURE_SQL: &str = "\
    UPDATE users SET \
        failed_login_count = CASE WHEN locked_until <= $2 THEN 1 \
            ELSE GREATEST(failed_login_count, 0) + 1 END, \
        locked_until = CASE \
            WHEN locked_until > $2 THEN locked_until \
            WHEN (CASE WHEN locked_until <= $2 THEN 1 \
                  ELSE GREATEST(failed_login_count, 0) + 1 END) >= $3 THEN $4 \
            ELSE NULL END, \
        updated_at = now() \
    WHERE id::text = $1 \
    RETURNING failed_login_count, locked_until";

/// Credential store over the `users` / `roles` / `permissions` tables.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn fetch_user(&self, sql: &str, arg: &str) -> Result<Option<Principal>, StoreError> {
        let row = within(self.timeout, async {
            Ok::<_, StoreError>(
                sqlx::query_as::<_, UserRow>(sql)
                    .bind(arg)
                    .fetch_optional(&self.pool)
                    .await?,
            )
        })
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let (roles, permissions) = self.fetch_authz(&row.0).await?;
        Ok(Some(principal_from_row(row, roles, permissions)))
    }

    /// Roles and the permissions they grant.
    async fn fetch_authz(&self, user_id: &str) -> Result<(Vec<String>, Vec<String>), StoreError> {
        within(self.timeout, async {
            let roles = sqlx::query_scalar::<_, String>(
                "SELECT r.code FROM roles r \
                 JOIN user_roles ur ON ur.role_id = r.id \
                 WHERE ur.user_id = $1::uuid ORDER BY r.code",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            let permissions = sqlx::query_scalar::<_, String>(
                "SELECT DISTINCT p.code FROM permissions p \
                 JOIN role_permissions rp ON rp.permission_id = p.id \
                 JOIN user_roles ur ON ur.role_id = rp.role_id \
                 WHERE ur.user_id = $1::uuid ORDER BY p.code",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            Ok::<_, StoreError>((roles, permissions))
        })
        .await
    }
}

fn principal_from_row(row: UserRow, roles: Vec<String>, permissions: Vec<String>) -> Principal {
    let (
        id,
        username,
        email,
        display_name,
        password_hash,
        status,
        failed_login_count,
        locked_until,
        otp_secret,
        last_login_at,
        last_login_ip,
    ) = row;
    Principal {
        id,
        username,
        email,
        display_name,
        status: AccountStatus::parse(&status),
        password_hash,
        roles,
        permissions,
        failed_login_count,
        locked_until,
        otp_secret: otp_secret.filter(|s| !s.is_empty()),
        last_login_at,
        last_login_ip,
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<Principal>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR lower(email) = lower($1) \
             ORDER BY (username = $1) DESC LIMIT 1"
        );
        self.fetch_user(&sql, login).await
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Principal>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id::text = $1");
        self.fetch_user(&sql, user_id).await
    }

    async fn record_failure(
        &self,
        user_id: &str,
        policy: &LockoutPolicy,
        at: DateTime<Utc>,
    ) -> Result<Option<FailureOutcome>, StoreError> {
        // Computed from the row being updated, so concurrent failures
        // serialize on the row lock instead of overwriting each other.
        let row = within(self.timeout, async {
            Ok::<_, StoreError>(
                sqlx::query_as::<_, (i32, Option<DateTime<Utc>>)>(RECORD_FAILURE_SQL)
                    .bind(user_id)
                    .bind(at)
                    .bind(policy.max_failed_attempts)
                    .bind(at + policy.lockout)
                    .fetch_optional(&self.pool)
                    .await?,
            )
        })
        .await?;
        Ok(row.map(|(failed_count, locked_until)| FailureOutcome {
            failed_count,
            locked_until,
        }))
    }

    async fn record_success(
        &self,
        user_id: &str,
        ip: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        within(self.timeout, async {
            sqlx::query(
                "UPDATE users SET failed_login_count = 0, locked_until = NULL, \
                 last_login_at = $2, last_login_ip = $3, login_count = login_count + 1, \
                 updated_at = now() WHERE id::text = $1",
            )
            .bind(user_id)
            .bind(at)
            .bind(ip)
            .execute(&self.pool)
            .await?;
            Ok::<_, StoreError>(())
        })
        .await
    }
}
