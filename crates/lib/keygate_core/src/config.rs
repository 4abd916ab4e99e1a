//! Typed IdP configuration.
//!
//! Settings are grouped per category and deserialized from an optional YAML
//! file, then overridden from environment variables. Nothing downstream
//! sees untyped values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Complete IdP configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdpConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub login: LoginConfig,
    pub cas: CasConfig,
    pub saml: SamlConfig,
}

/// HTTP listener and public URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:8080").
    pub bind_addr: String,
    /// Externally visible base URL, used in SAML metadata and redirects.
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            base_url: "http://localhost:8080".into(),
        }
    }
}

/// Relational store. Without a URL the in-memory stores are used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub op_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            op_timeout_ms: 3_000,
        }
    }
}

impl DatabaseConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Session cache backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

/// Distributed session cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub op_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".into(),
            op_timeout_ms: 2_000,
        }
    }
}

impl CacheConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Access/refresh token signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HS256 secret. Empty means "resolve from env or the persisted file".
    #[serde(skip_serializing)]
    pub secret: String,
    pub issuer: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    /// Clock skew tolerated on `exp`/`nbf`.
    pub leeway_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "keygate".into(),
            access_token_ttl_secs: 60 * 60,
            refresh_token_ttl_secs: 7 * 24 * 60 * 60,
            leeway_secs: 30,
        }
    }
}

/// Server-side sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_secs: i64,
    pub allow_multi_device_login: bool,
    pub cookie_name: String,
    pub cookie_secure: bool,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 8 * 60 * 60,
            allow_multi_device_login: true,
            cookie_name: "keygate_session".into(),
            cookie_secure: false,
            sweep_interval_secs: 300,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs)
    }
}

/// Password login policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub enable_otp: bool,
    pub max_failed_attempts: i32,
    pub lockout_minutes: i64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            enable_otp: false,
            max_failed_attempts: 5,
            lockout_minutes: 30,
        }
    }
}

/// CAS ticket lifetimes and proxy callback policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CasConfig {
    pub service_ticket_ttl_secs: i64,
    pub proxy_ticket_ttl_secs: i64,
    pub proxy_granting_ticket_ttl_secs: i64,
    /// Permit `http://` pgtUrl callbacks (development only).
    pub allow_insecure_pgt_url: bool,
    pub callback_timeout_secs: u64,
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            service_ticket_ttl_secs: 5 * 60,
            proxy_ticket_ttl_secs: 5 * 60,
            proxy_granting_ticket_ttl_secs: 2 * 60 * 60,
            allow_insecure_pgt_url: false,
            callback_timeout_secs: 5,
        }
    }
}

/// SAML IdP identity and key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamlConfig {
    pub enabled: bool,
    /// IdP entity id; defaults to `{base_url}/saml/metadata`.
    pub entity_id: Option<String>,
    /// PEM certificate and PKCS#8 key. Generated when absent.
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// Persist generated key material under the user data directory.
    pub persist_generated: bool,
    pub organization_name: String,
}

impl Default for SamlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entity_id: None,
            cert_path: None,
            key_path: None,
            persist_generated: true,
            organization_name: "Keygate".into(),
        }
    }
}

impl IdpConfig {
    /// Load from an optional YAML file, then apply environment overrides.
    ///
    /// | Variable                 | Field                        |
    /// |--------------------------|------------------------------|
    /// | `BIND_ADDR`              | `server.bind_addr`           |
    /// | `BASE_URL`               | `server.base_url`            |
    /// | `DATABASE_URL`           | `database.url`               |
    /// | `REDIS_URL`              | `cache.redis_url` (+ backend) |
    /// | `JWT_SECRET`             | `jwt.secret`                 |
    /// | `JWT_ISSUER`             | `jwt.issuer`                 |
    /// | `SESSION_TTL_SECS`       | `session.ttl_secs`           |
    /// | `COOKIE_SECURE`          | `session.cookie_secure`      |
    /// | `ENABLE_OTP`             | `login.enable_otp`           |
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|source| ConfigError::Io {
                    path: p.to_path_buf(),
                    source,
                })?;
                serde_yaml::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = get("BASE_URL") {
            self.server.base_url = v;
        }
        if let Some(v) = get("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Some(v) = get("REDIS_URL") {
            self.cache.redis_url = v;
            self.cache.backend = CacheBackend::Redis;
        }
        if let Some(v) = get("JWT_SECRET") {
            self.jwt.secret = v;
        }
        if let Some(v) = get("JWT_ISSUER") {
            self.jwt.issuer = v;
        }
        if let Some(v) = get("SESSION_TTL_SECS") {
            self.session.ttl_secs = v.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "SESSION_TTL_SECS",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("COOKIE_SECURE") {
            self.session.cookie_secure = parse_bool("COOKIE_SECURE", &v)?;
        }
        if let Some(v) = get("ENABLE_OTP") {
            self.login.enable_otp = parse_bool("ENABLE_OTP", &v)?;
        }
        Ok(())
    }

    /// Public base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.server.base_url.trim_end_matches('/')
    }

    /// IdP entity id.
    pub fn saml_entity_id(&self) -> String {
        self.saml
            .entity_id
            .clone()
            .unwrap_or_else(|| format!("{}/saml/metadata", self.base_url()))
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key,
            value: value.to_string(),
        }),
    }
}
