//! Bearer authentication for the JSON API.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use keygate_core::auth::AuthError;
use keygate_core::auth::jwt::{Claims, TokenKind, bearer_token};
use keygate_core::session::SessionError;

use crate::AppState;
use crate::error::AppError;

/// The caller, as established by [`require_auth`]. Handlers take it with
/// `Extension<AuthenticatedPrincipal>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub user_id: String,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub session_id: String,
    pub trade_id: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthenticatedPrincipal {
    fn from_claims(claims: Claims) -> Self {
        let expires_at = claims.expires_at();
        Self {
            username: claims.username.unwrap_or_default(),
            user_id: claims.user_id,
            roles: claims.roles,
            permissions: claims.permissions,
            session_id: claims.session_id,
            trade_id: claims.trade_id,
            expires_at,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Extracts `Authorization: Bearer <token>`, validates it as an access
/// token, rejects revoked trade ids and dead sessions, then injects
/// [`AuthenticatedPrincipal`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("unauthorized", "Missing authorization header"))?;

    let token = bearer_token(header);
    if token.is_empty() {
        return Err(AppError::unauthorized(
            "unauthorized",
            "Invalid authorization scheme",
        ));
    }

    let claims = state.tokens.validate(token, TokenKind::Access)?;

    if state.sessions.is_blacklisted(&claims.trade_id).await? {
        return Err(AuthError::TokenRevoked.into());
    }

    match state.sessions.touch(&claims.session_id).await {
        Ok(_) => {}
        Err(SessionError::NotFound) => return Err(AuthError::SessionExpired.into()),
        Err(e) => return Err(e.into()),
    }

    request
        .extensions_mut()
        .insert(AuthenticatedPrincipal::from_claims(claims));

    Ok(next.run(request).await)
}
