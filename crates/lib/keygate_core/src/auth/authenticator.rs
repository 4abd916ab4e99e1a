//! Password (+ optional OTP) authentication with lockout accounting.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::AuthError;
use super::lockout::LockoutPolicy;
use super::otp;
use super::password::verify_password;
use super::store::CredentialStore;
use crate::models::auth::{AccountStatus, Principal};

/// Submitted credentials.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    /// Username or email.
    pub login: &'a str,
    pub password: &'a str,
    pub otp_code: Option<&'a str>,
}

/// Shared credential check used by every login entry point.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
    policy: LockoutPolicy,
    otp_enabled: bool,
}

impl Authenticator {
    pub fn new(store: Arc<dyn CredentialStore>, policy: LockoutPolicy, otp_enabled: bool) -> Self {
        Self {
            store,
            policy,
            otp_enabled,
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Check credentials and return the authenticated principal.
    ///
    /// Unknown users and wrong passwords both yield `InvalidCredentials`.
    /// Inactive and locked accounts are reported as such.
    pub async fn authenticate(
        &self,
        credentials: Credentials<'_>,
        client_ip: &str,
    ) -> Result<Principal, AuthError> {
        let now = Utc::now();
        let Some(mut principal) = self.store.find_by_login(credentials.login).await? else {
            info!(login = credentials.login, "login for unknown account");
            return Err(AuthError::InvalidCredentials);
        };

        if principal.status != AccountStatus::Active {
            return Err(AuthError::AccountInactive);
        }
        if let Some(until) = principal.locked_until.filter(|u| *u > now) {
            return Err(AuthError::AccountLocked { until });
        }

        let password_ok = principal
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(credentials.password, hash));
        if !password_ok {
            return Err(self.fail(&principal).await);
        }

        if self.otp_enabled
            && let Some(secret) = principal.otp_secret.as_deref()
        {
            let Some(code) = credentials.otp_code.filter(|c| !c.is_empty()) else {
                return Err(AuthError::OtpRequired);
            };
            if !otp::verify_code(secret, code)? {
                return Err(match self.fail(&principal).await {
                    AuthError::InvalidCredentials => AuthError::InvalidOtp,
                    other => other,
                });
            }
        }

        if let Err(e) = self.store.record_success(&principal.id, client_ip, now).await {
            warn!(user_id = %principal.id, error = %e, "failed to record successful login");
        }
        principal.failed_login_count = 0;
        principal.locked_until = None;
        principal.last_login_at = Some(now);
        principal.last_login_ip = Some(client_ip.to_string());
        info!(user_id = %principal.id, username = %principal.username, "login succeeded");
        Ok(principal)
    }

    /// Count a failed attempt and return the error to report.
    ///
    /// The lock decision comes from the store's post-increment state, never
    /// from the principal read before the password check.
    async fn fail(&self, principal: &Principal) -> AuthError {
        let outcome = match self
            .store
            .record_failure(&principal.id, &self.policy, Utc::now())
            .await
        {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return AuthError::InvalidCredentials,
            Err(e) => {
                warn!(user_id = %principal.id, error = %e, "failed to record login failure");
                return AuthError::Store(e);
            }
        };
        match outcome.locked_until {
            Some(until) => {
                warn!(
                    user_id = %principal.id,
                    failed_count = outcome.failed_count,
                    %until,
                    "account locked after repeated failures"
                );
                AuthError::AccountLocked { until }
            }
            None => AuthError::InvalidCredentials,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::tests::alice;
    use crate::auth::password::hash_password;
    use crate::auth::store::MemoryCredentialStore;
    use chrono::Duration;

    fn setup(otp_enabled: bool) -> (Arc<MemoryCredentialStore>, Authenticator) {
        let store = Arc::new(MemoryCredentialStore::new());
        let mut p = alice();
        p.password_hash = Some(hash_password("s3cret").unwrap());
        store.insert(p);
        let auth = Authenticator::new(store.clone(), LockoutPolicy::default(), otp_enabled);
        (store, auth)
    }

    fn creds<'a>(login: &'a str, password: &'a str) -> Credentials<'a> {
        Credentials {
            login,
            password,
            otp_code: None,
        }
    }

    #[tokio::test]
    async fn login_by_username_or_email() {
        let (_, auth) = setup(false);
        assert_eq!(auth.authenticate(creds("alice", "s3cret"), "1.2.3.4").await.unwrap().id, "u-1");
        assert_eq!(auth.authenticate(creds("A@B.com", "s3cret"), "1.2.3.4").await.unwrap().id, "u-1");
    }

    #[tokio::test]
    async fn unknown_user_and_bad_password_look_the_same() {
        let (_, auth) = setup(false);
        let a = auth.authenticate(creds("nobody", "x"), "ip").await.unwrap_err();
        let b = auth.authenticate(creds("alice", "x"), "ip").await.unwrap_err();
        assert_eq!(a.to_string(), b.to_string());
    }

    #[tokio::test]
    async fn fifth_failure_locks_and_blocks_correct_password() {
        let (store, auth) = setup(false);
        for _ in 0..4 {
            assert!(matches!(
                auth.authenticate(creds("alice", "bad"), "ip").await,
                Err(AuthError::InvalidCredentials)
            ));
        }
        let err = auth.authenticate(creds("alice", "bad"), "ip").await.unwrap_err();
        let AuthError::AccountLocked { until } = err else {
            panic!("expected lock, got {err:?}");
        };
        let expected = Utc::now() + Duration::minutes(30);
        assert!((until - expected).num_seconds().abs() < 5);

        assert!(matches!(
            auth.authenticate(creds("alice", "s3cret"), "ip").await,
            Err(AuthError::AccountLocked { .. })
        ));
        let stored = store.find_by_id("u-1").await.unwrap().unwrap();
        assert_eq!(stored.failed_login_count, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_are_all_counted() {
        let (store, auth) = setup(false);
        let attempts: Vec<_> = (0..20)
            .map(|_| {
                let auth = auth.clone();
                tokio::spawn(async move { auth.authenticate(creds("alice", "bad"), "ip").await })
            })
            .collect();
        let mut invalid = 0;
        let mut locked = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Err(AuthError::InvalidCredentials) => invalid += 1,
                Err(AuthError::AccountLocked { .. }) => locked += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(invalid, 4);
        assert_eq!(locked, 16);

        let stored = store.find_by_id("u-1").await.unwrap().unwrap();
        assert!(stored.failed_login_count >= 5);
        assert!(stored.locked_until.is_some_and(|u| u > Utc::now()));
        assert!(matches!(
            auth.authenticate(creds("alice", "s3cret"), "ip").await,
            Err(AuthError::AccountLocked { .. })
        ));
    }

    #[tokio::test]
    async fn success_resets_counter() {
        let (store, auth) = setup(false);
        for _ in 0..3 {
            let _ = auth.authenticate(creds("alice", "bad"), "ip").await;
        }
        auth.authenticate(creds("alice", "s3cret"), "10.0.0.1").await.unwrap();
        let stored = store.find_by_id("u-1").await.unwrap().unwrap();
        assert_eq!(stored.failed_login_count, 0);
        assert!(stored.locked_until.is_none());
        assert_eq!(stored.last_login_ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn inactive_account_is_reported() {
        let (store, auth) = setup(false);
        let mut p = store.find_by_id("u-1").await.unwrap().unwrap();
        p.status = AccountStatus::Inactive;
        store.insert(p);
        assert!(matches!(
            auth.authenticate(creds("alice", "s3cret"), "ip").await,
            Err(AuthError::AccountInactive)
        ));
    }

    #[tokio::test]
    async fn otp_is_required_when_enrolled() {
        let (store, auth) = setup(true);
        let mut p = store.find_by_id("u-1").await.unwrap().unwrap();
        p.otp_secret = Some("JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP".into());
        store.insert(p);
        assert!(matches!(
            auth.authenticate(creds("alice", "s3cret"), "ip").await,
            Err(AuthError::OtpRequired)
        ));
        let secret = totp_rs::Secret::Encoded("JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP".into())
            .to_bytes()
            .unwrap();
        let code = totp_rs::TOTP::new(totp_rs::Algorithm::SHA1, 6, 1, 30, secret, None, String::new())
            .unwrap()
            .generate_current()
            .unwrap();
        let ok = Credentials {
            otp_code: Some(&code),
            ..creds("alice", "s3cret")
        };
        assert_eq!(auth.authenticate(ok, "ip").await.unwrap().id, "u-1");
    }
}
