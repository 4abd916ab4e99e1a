//! Authentication domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account status as stored by the credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Disabled,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Disabled => "disabled",
        }
    }

    /// Parse the stored representation; unknown values are treated as inactive.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => AccountStatus::Active,
            "disabled" => AccountStatus::Disabled,
            _ => AccountStatus::Inactive,
        }
    }
}

/// An authenticatable user, as resolved from the credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub status: AccountStatus,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub failed_login_count: i32,
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub otp_secret: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
}

impl Principal {
    /// True while `locked_until` lies in the future.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Client metadata captured when a session is opened.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}
