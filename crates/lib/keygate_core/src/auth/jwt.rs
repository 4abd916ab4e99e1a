//! JWT access/refresh token issuance and verification.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::AuthError;
use crate::config::JwtConfig;
use crate::ids::uuidv7;
use crate::models::auth::Principal;

/// Which validation path a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by both token kinds.
///
/// Refresh tokens leave the identity snapshot and authorization fields
/// empty; roles and permissions are re-derived at refresh time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    pub session_id: String,
    pub trade_id: String,
    pub token_type: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    /// Expiry as a timestamp.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at() - now).max(Duration::zero())
    }
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub jti: String,
}

/// HS256 token service.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    leeway_secs: u64,
}

impl TokenService {
    pub fn new(secret: &[u8], config: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: config.issuer.clone(),
            access_ttl: Duration::seconds(config.access_token_ttl_secs),
            refresh_ttl: Duration::seconds(config.refresh_token_ttl_secs),
            leeway_secs: config.leeway_secs,
        }
    }

    /// Build from config, resolving the secret when the config leaves it empty.
    pub fn from_config(config: &JwtConfig) -> Self {
        let secret = if config.secret.is_empty() {
            resolve_jwt_secret()
        } else {
            config.secret.clone()
        };
        Self::new(secret.as_bytes(), config)
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign an access token carrying the principal's identity and authz claims.
    pub fn issue_access(
        &self,
        principal: &Principal,
        session_id: &str,
        trade_id: &str,
    ) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: principal.id.clone(),
            user_id: principal.id.clone(),
            username: Some(principal.username.clone()),
            email: Some(principal.email.clone()),
            display_name: Some(principal.display_name.clone()),
            roles: principal.roles.clone(),
            permissions: principal.permissions.clone(),
            session_id: session_id.to_string(),
            trade_id: trade_id.to_string(),
            token_type: TokenKind::Access,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            jti: uuidv7().to_string(),
        };
        self.sign(claims)
    }

    /// Sign a refresh token carrying only identity linkage.
    pub fn issue_refresh(
        &self,
        user_id: &str,
        session_id: &str,
        trade_id: &str,
    ) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            user_id: user_id.to_string(),
            username: None,
            email: None,
            display_name: None,
            roles: Vec::new(),
            permissions: Vec::new(),
            session_id: session_id.to_string(),
            trade_id: trade_id.to_string(),
            token_type: TokenKind::Refresh,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
            jti: uuidv7().to_string(),
        };
        self.sign(claims)
    }

    fn sign(&self, claims: Claims) -> Result<IssuedToken, AuthError> {
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))?;
        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
            jti: claims.jti,
        })
    }

    /// Verify signature, issuer, `exp`, `nbf` and the kind tag.
    ///
    /// Every failure collapses into [`AuthError::TokenInvalid`].
    pub fn validate(&self, token: &str, expected: TokenKind) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = self.leeway_secs;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| {
                debug!(error = %e, "token rejected");
                AuthError::TokenInvalid
            })?
            .claims;

        if claims.token_type != expected || claims.user_id.is_empty() {
            debug!(kind = ?claims.token_type, expected = ?expected, "token kind mismatch");
            return Err(AuthError::TokenInvalid);
        }
        Ok(claims)
    }
}

/// Return the token after `Bearer `, or `""` when the scheme is absent.
pub fn bearer_token(header: &str) -> &str {
    match header.strip_prefix("Bearer ") {
        Some(token) => token.trim(),
        None => "",
    }
}

/// Resolve the JWT secret: env var `JWT_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    let secret_path = jwt_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new JWT secret");
    secret
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    crate::saml::credentials::data_dir().join("jwt-secret")
}
