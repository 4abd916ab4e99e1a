//! Application launch from the portal.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use keygate_core::models::application::Protocol;
use keygate_core::saml::SamlError;
use keygate_core::saml::assertion::ServiceProvider;
use keygate_core::saml::form::auto_post_form;
use tracing::info;

use super::cas::{subject, with_ticket};
use super::{found, html};
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::services::auth::require_user;

/// `GET /apps/{id}/launch`: sign the current user into an application
/// with the protocol it is registered for.
pub async fn launch_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(app_id): Path<String>,
) -> AppResult<Response> {
    let user = require_user(&state, &headers, &jar).await?;
    let app = state
        .apps
        .find_by_id(&app_id)
        .await?
        .filter(|app| app.active)
        .ok_or_else(|| AppError::NotFound(format!("Application {app_id} not found")))?;

    info!(
        user_id = %user.principal.id,
        app_id = %app.id,
        protocol = app.protocol.as_str(),
        "application launch"
    );

    match app.protocol {
        Protocol::Saml => {
            let builder = state.saml.as_ref().ok_or(SamlError::Unavailable)?;
            let sp = ServiceProvider::from_application(&app)?;
            let built = builder.build_response(&user.principal, &sp, None)?;
            Ok(html(auto_post_form(
                sp.acs_url,
                "SAMLResponse",
                &built.to_base64(),
                None,
            )))
        }
        Protocol::Cas => {
            let service = app
                .service_url
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| AppError::NotFound(format!("Application {app_id} has no service URL")))?;
            let ticket = state
                .tickets
                .issue_service_ticket(subject(&user.principal), service, false)
                .await;
            Ok(found(&with_ticket(service, &ticket.id)?))
        }
        Protocol::OAuth2 | Protocol::Oidc => Err(AppError::NotImplemented(format!(
            "{} launch is not supported",
            app.protocol.as_str()
        ))),
        Protocol::Direct => {
            let home = app
                .home_page_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| AppError::NotFound(format!("Application {app_id} has no home page")))?;
            Ok(found(home))
        }
    }
}
