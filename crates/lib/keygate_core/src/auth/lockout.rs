//! Consecutive-failure lockout policy.

use chrono::{DateTime, Duration, Utc};

use crate::config::LoginConfig;
use crate::models::auth::Principal;

/// Counter state after a failed attempt has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub failed_count: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Lock after `max_failed_attempts` consecutive failures for a fixed window.
///
/// The window is absolute: it starts at the failing attempt and is not
/// extended by attempts that land while it is active.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_attempts: i32,
    pub lockout: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout: Duration::minutes(30),
        }
    }
}

impl LockoutPolicy {
    pub fn from_config(config: &LoginConfig) -> Self {
        Self {
            max_failed_attempts: config.max_failed_attempts.max(1),
            lockout: Duration::minutes(config.lockout_minutes),
        }
    }

    /// Next counter state after a failure at `now`.
    ///
    /// Stores apply this to the current row while holding it, so concurrent
    /// failures each see the previous one's count. Once a previous lock has
    /// elapsed the count starts over.
    pub fn on_failure(&self, principal: &Principal, now: DateTime<Utc>) -> FailureOutcome {
        let (previous, active_lock) = match principal.locked_until {
            Some(until) if until <= now => (0, None),
            lock => (principal.failed_login_count.max(0), lock),
        };
        let failed_count = previous.saturating_add(1);
        let locked_until = active_lock.or_else(|| {
            (failed_count >= self.max_failed_attempts).then(|| now + self.lockout)
        });
        FailureOutcome {
            failed_count,
            locked_until,
        }
    }
}
