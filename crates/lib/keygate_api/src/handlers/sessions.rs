//! Session listing and revocation.

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use keygate_core::session::SessionRecord;
use serde::Serialize;
use tracing::{info, warn};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedPrincipal;

#[derive(Debug, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: SessionRecord,
    /// The session the request was made with.
    pub current: bool,
}

#[derive(Debug, Serialize)]
pub struct ForceLogoutResponse {
    pub user_id: String,
    pub sessions_terminated: usize,
}

/// `GET /auth/sessions`: the caller's live sessions, newest first.
pub async fn list_sessions_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedPrincipal>,
) -> AppResult<Json<Vec<SessionView>>> {
    let mut sessions = state.sessions.list_for_user(&caller.user_id).await?;
    sessions.sort_by(|a, b| b.login_time.cmp(&a.login_time));
    let views = sessions
        .into_iter()
        .map(|session| SessionView {
            current: session.session_id == caller.session_id,
            session,
        })
        .collect();
    Ok(Json(views))
}

/// `DELETE /auth/sessions/{id}`: end one of the caller's own sessions.
pub async fn revoke_session_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedPrincipal>,
    Path(session_id): Path<String>,
) -> AppResult<StatusCode> {
    let session = state.sessions.get(&session_id).await?;
    if session.user_id != caller.user_id {
        // Other users' sessions are indistinguishable from missing ones.
        warn!(user_id = %caller.user_id, "attempt to revoke a foreign session");
        return Err(AppError::NotFound("Session not found".into()));
    }
    state.sessions.delete(&session_id).await?;
    info!(user_id = %caller.user_id, session_id = %session_id, "session revoked");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /admin/users/{id}/logout`: terminate every session of a user.
pub async fn force_logout_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedPrincipal>,
    Path(user_id): Path<String>,
) -> AppResult<Json<ForceLogoutResponse>> {
    if !caller.has_role("admin") {
        return Err(AppError::Forbidden("Admin role required".into()));
    }
    let sessions_terminated = state.sessions.force_logout(&user_id).await?;
    info!(admin = %caller.username, user_id = %user_id, sessions_terminated, "forced logout");
    Ok(Json(ForceLogoutResponse {
        user_id,
        sessions_terminated,
    }))
}
