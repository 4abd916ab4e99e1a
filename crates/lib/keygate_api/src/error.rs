//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use keygate_core::auth::AuthError;
use keygate_core::cas::CasError;
use keygate_core::saml::SamlError;
use keygate_core::session::SessionError;
use keygate_core::store::StoreError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// 401 with a machine-readable code (`invalid_credentials`,
    /// `token_revoked`, `login_required`, ...).
    #[error("Unauthorized: {message}")]
    Unauthorized { code: &'static str, message: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Account locked until {0}")]
    Locked(DateTime<Utc>),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Unauthorized {
            code,
            message: message.into(),
        }
    }

    /// No usable browser session.
    pub fn login_required() -> Self {
        Self::unauthorized("login_required", "Authentication required")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut locked_until = None;
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.clone()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone()),
            AppError::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, *code, message.clone())
            }
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.clone()),
            AppError::Locked(until) => {
                locked_until = Some(*until);
                (
                    StatusCode::LOCKED,
                    "account_locked",
                    format!("Account is locked until {}", until.to_rfc3339()),
                )
            }
            AppError::NotImplemented(m) => {
                (StatusCode::NOT_IMPLEMENTED, "not_implemented", m.clone())
            }
            AppError::Unavailable(m) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", m.clone())
            }
            AppError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
            locked_until,
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => {
                AppError::unauthorized("invalid_credentials", "Invalid username or password")
            }
            AuthError::AccountLocked { until } => AppError::Locked(until),
            AuthError::AccountInactive => AppError::Forbidden("Account is not active".into()),
            AuthError::OtpRequired => {
                AppError::unauthorized("otp_required", "One-time password required")
            }
            AuthError::InvalidOtp => {
                AppError::unauthorized("invalid_otp", "Invalid one-time password")
            }
            AuthError::TokenInvalid => {
                AppError::unauthorized("token_invalid", "Invalid or expired token")
            }
            AuthError::TokenRevoked => AppError::unauthorized("token_revoked", "Token has been revoked"),
            AuthError::SessionExpired => {
                AppError::unauthorized("session_expired", "Session has expired")
            }
            AuthError::Store(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound => AppError::NotFound("Session not found".into()),
            SessionError::Cache(e) => AppError::Unavailable(format!("session cache: {e}")),
            SessionError::Corrupt(e) => AppError::Internal(format!("corrupt session: {e}")),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Timeout(e) => AppError::Unavailable(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Used on the JSON surfaces (app launch, CAS login). Validation endpoints
/// answer with CAS documents instead.
impl From<CasError> for AppError {
    fn from(e: CasError) -> Self {
        match e {
            CasError::TicketInvalid => AppError::Validation("Ticket is invalid".into()),
            CasError::ServiceNotRegistered(s) => {
                AppError::Forbidden(format!("Service is not registered: {s}"))
            }
            CasError::InvalidRequest(m) | CasError::InvalidProxyCallback(m) => {
                AppError::Validation(m)
            }
            CasError::Store(e) => AppError::from(e),
        }
    }
}

impl From<SamlError> for AppError {
    fn from(e: SamlError) -> Self {
        match e {
            SamlError::ServiceNotRegistered(sp) => {
                AppError::Forbidden(format!("Service provider is not registered: {sp}"))
            }
            SamlError::InvalidRequest(m) => AppError::Validation(m),
            SamlError::SigningFailure(m) => AppError::Internal(format!("signing: {m}")),
            SamlError::Unavailable => AppError::Unavailable("SAML is not available".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockout_reports_status_and_deadline() {
        let until = Utc::now();
        let resp = AppError::from(AuthError::AccountLocked { until }).into_response();
        assert_eq!(resp.status(), StatusCode::LOCKED);
    }

    #[test]
    fn unknown_user_and_bad_password_share_one_answer() {
        let resp = AppError::from(AuthError::InvalidCredentials).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn missing_session_and_corrupt_rows_map_to_statuses() {
        let err = AppError::from(SessionError::NotFound);
        assert!(matches!(err, AppError::NotFound(_)));
        let err = AppError::from(StoreError::Corrupt("x".into()));
        assert!(matches!(err, AppError::Internal(_)));
    }
}
