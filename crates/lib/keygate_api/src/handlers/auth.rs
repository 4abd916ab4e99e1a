//! Password login, token refresh and logout.

use axum::extract::{Extension, State};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use keygate_core::auth::authenticator::Credentials;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedPrincipal;
use crate::services::auth::{self, TokenResponse};
use crate::services::client::Client;
use crate::services::cookies;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email.
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub otp_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// `POST /auth/login`: authenticate, open a session, set the session
/// cookie and return the token pair.
pub async fn login_handler(
    State(state): State<AppState>,
    Client(client): Client,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let credentials = Credentials {
        login: &body.username,
        password: &body.password,
        otp_code: body.otp_code.as_deref(),
    };
    let outcome = auth::login(&state, credentials, &client, "password").await?;
    let jar = jar.add(cookies::session_cookie(
        &state.config.session,
        &outcome.session.session_id,
    ));
    Ok((jar, Json(outcome.tokens)))
}

/// `POST /auth/refresh`: exchange a refresh token for a new token pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let tokens = auth::refresh(&state, &body.refresh_token).await?;
    Ok(Json(tokens))
}

/// `POST /auth/logout`: revoke the caller's tokens and end the session.
///
/// The trade id is blacklisted for what is left of the access token's
/// lifetime, which also covers the refresh token of the same pair.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedPrincipal>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<LogoutResponse>)> {
    let remaining = caller.expires_at - chrono::Utc::now();
    if remaining > chrono::Duration::zero() {
        state.sessions.blacklist(&caller.trade_id, remaining).await?;
    }
    state.sessions.delete(&caller.session_id).await?;
    info!(user_id = %caller.user_id, session_id = %caller.session_id, "logged out");
    let jar = jar.add(cookies::clear_session_cookie(&state.config.session));
    Ok((jar, Json(LogoutResponse { success: true })))
}
