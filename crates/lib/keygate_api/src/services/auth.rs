//! Login, refresh and browser-session resolution shared by the JSON API and
//! the protocol front ends.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use keygate_core::auth::AuthError;
use keygate_core::auth::authenticator::Credentials;
use keygate_core::auth::jwt::{TokenKind, bearer_token};
use keygate_core::ids::trade_id;
use keygate_core::models::auth::{AccountStatus, ClientInfo, Principal};
use keygate_core::session::{SessionError, SessionRecord};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::services::cookies;

/// Public view of the authenticated user.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl From<&Principal> for UserSummary {
    fn from(p: &Principal) -> Self {
        Self {
            id: p.id.clone(),
            username: p.username.clone(),
            email: p.email.clone(),
            display_name: p.display_name.clone(),
            roles: p.roles.clone(),
            permissions: p.permissions.clone(),
        }
    }
}

/// Token pair handed out by login and refresh.
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
    pub session_id: String,
    pub user: UserSummary,
}

/// Result of a successful credential check.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub principal: Principal,
    pub session: SessionRecord,
    pub tokens: TokenResponse,
}

fn issue_pair(
    state: &AppState,
    principal: &Principal,
    session_id: &str,
    trade_id: &str,
) -> AppResult<TokenResponse> {
    let access = state.tokens.issue_access(principal, session_id, trade_id)?;
    let refresh = state
        .tokens
        .issue_refresh(&principal.id, session_id, trade_id)?;
    Ok(TokenResponse {
        access_token: access.token,
        refresh_token: refresh.token,
        token_type: "Bearer".into(),
        expires_in: state.tokens.access_ttl().num_seconds(),
        expires_at: access.expires_at,
        session_id: session_id.to_string(),
        user: UserSummary::from(principal),
    })
}

/// Authenticate, open a session and issue the token pair.
///
/// `source` tags the trade id (`password`, `cas`, ...).
pub async fn login(
    state: &AppState,
    credentials: Credentials<'_>,
    client: &ClientInfo,
    source: &str,
) -> AppResult<LoginOutcome> {
    let principal = state
        .authenticator
        .authenticate(credentials, &client.ip)
        .await?;
    let trade = trade_id(source);
    let session = state
        .sessions
        .create(&principal, client, Some(&trade), state.config.session.ttl())
        .await?;
    let tokens = issue_pair(state, &principal, &session.session_id, &trade)?;
    info!(
        user_id = %principal.id,
        session_id = %session.session_id,
        trade_id = %trade,
        source,
        "login succeeded"
    );
    Ok(LoginOutcome {
        principal,
        session,
        tokens,
    })
}

/// Exchange a refresh token for a new pair bound to the same session.
///
/// Roles and permissions are re-read from the credential store.
pub async fn refresh(state: &AppState, refresh_token: &str) -> AppResult<TokenResponse> {
    let claims = state.tokens.validate(refresh_token, TokenKind::Refresh)?;
    if state.sessions.is_blacklisted(&claims.trade_id).await? {
        return Err(AuthError::TokenRevoked.into());
    }
    let session = match state.sessions.touch(&claims.session_id).await {
        Ok(session) => session,
        Err(SessionError::NotFound) => return Err(AuthError::SessionExpired.into()),
        Err(e) => return Err(e.into()),
    };
    if session.user_id != claims.user_id {
        warn!(session_id = %session.session_id, "refresh token bound to another user's session");
        return Err(AuthError::TokenInvalid.into());
    }
    let principal = state
        .authenticator
        .store()
        .find_by_id(&claims.user_id)
        .await?
        .ok_or(AuthError::TokenInvalid)?;
    if principal.status != AccountStatus::Active {
        return Err(AuthError::AccountInactive.into());
    }
    let tokens = issue_pair(state, &principal, &claims.session_id, &claims.trade_id)?;
    debug!(user_id = %principal.id, session_id = %claims.session_id, "tokens refreshed");
    Ok(tokens)
}

/// The user behind a browser request.
#[derive(Debug, Clone)]
pub struct BrowserUser {
    pub principal: Principal,
    pub session: SessionRecord,
}

/// Session id carried by a valid, non-revoked bearer token.
async fn bearer_session(state: &AppState, headers: &HeaderMap) -> AppResult<Option<String>> {
    let Some(header) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    let token = bearer_token(header);
    if token.is_empty() {
        return Ok(None);
    }
    let Ok(claims) = state.tokens.validate(token, TokenKind::Access) else {
        debug!("ignoring invalid bearer token on browser flow");
        return Ok(None);
    };
    if state.sessions.is_blacklisted(&claims.trade_id).await? {
        return Ok(None);
    }
    Ok(Some(claims.session_id))
}

/// Resolve the current user from a bearer token or the session cookie.
///
/// Expired sessions, deleted users and inactive accounts all read as
/// "nobody". Cache outages are errors.
pub async fn current_user(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> AppResult<Option<BrowserUser>> {
    let session_id = match bearer_session(state, headers).await? {
        Some(id) => id,
        None => match cookies::session_id(&state.config.session, jar) {
            Some(id) => id,
            None => return Ok(None),
        },
    };
    let session = match state.sessions.touch(&session_id).await {
        Ok(session) => session,
        Err(SessionError::NotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let Some(principal) = state
        .authenticator
        .store()
        .find_by_id(&session.user_id)
        .await?
    else {
        warn!(user_id = %session.user_id, "session outlived its user");
        return Ok(None);
    };
    if principal.status != AccountStatus::Active {
        return Ok(None);
    }
    Ok(Some(BrowserUser { principal, session }))
}

/// Like [`current_user`] but answers `login_required` when nobody is signed in.
pub async fn require_user(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> AppResult<BrowserUser> {
    current_user(state, headers, jar)
        .await?
        .ok_or_else(AppError::login_required)
}

/// Delete the session named by the browser cookie, if any.
pub async fn end_browser_session(state: &AppState, jar: &CookieJar) -> AppResult<Option<String>> {
    let Some(session_id) = cookies::session_id(&state.config.session, jar) else {
        return Ok(None);
    };
    state.sessions.delete(&session_id).await?;
    info!(session_id = %session_id, "browser session ended");
    Ok(Some(session_id))
}
