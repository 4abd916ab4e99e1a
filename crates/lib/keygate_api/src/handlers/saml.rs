//! SAML 2.0 IdP endpoints: metadata, SSO and single logout.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Form, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use keygate_core::models::application::Application;
use keygate_core::saml::SamlError;
use keygate_core::saml::assertion::{AssertionBuilder, ServiceProvider};
use keygate_core::saml::form::auto_post_form;
use keygate_core::saml::metadata::{IdpEndpoints, idp_metadata};
use keygate_core::saml::request::{Binding, decode, parse_authn_request, parse_logout_request};
use serde::Deserialize;
use tracing::info;

use super::cas::LogoutStatus;
use super::{html, non_empty, xml};
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::services::auth::{end_browser_session, require_user};
use crate::services::cookies;

/// `SAMLRequest` and `RelayState`, from the query string or a form body.
#[derive(Debug, Default, Deserialize)]
pub struct SamlMessage {
    #[serde(rename = "SAMLRequest")]
    pub saml_request: Option<String>,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

fn builder(state: &AppState) -> Result<&Arc<AssertionBuilder>, SamlError> {
    state.saml.as_ref().ok_or(SamlError::Unavailable)
}

async fn registered_sp(state: &AppState, entity_id: &str) -> AppResult<Application> {
    state
        .apps
        .find_by_entity_id(entity_id)
        .await?
        .ok_or_else(|| AppError::from(SamlError::ServiceNotRegistered(entity_id.to_string())))
}

/// `GET /saml/metadata`
pub async fn metadata_handler(State(state): State<AppState>) -> AppResult<Response> {
    let builder = builder(&state)?;
    let endpoints = IdpEndpoints::under(state.config.base_url());
    Ok(xml(idp_metadata(
        builder.idp_entity_id(),
        &endpoints,
        &builder.credentials().certificate_base64(),
        &state.config.saml.organization_name,
    )))
}

async fn single_sign_on(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
    message: SamlMessage,
    binding: Binding,
) -> AppResult<Response> {
    let builder = builder(state)?;
    let encoded = non_empty(message.saml_request)
        .ok_or_else(|| AppError::Validation("SAMLRequest is required".into()))?;
    let request = parse_authn_request(&decode(&encoded, binding)?)?;

    let app = registered_sp(state, &request.issuer).await?;
    let sp = ServiceProvider::from_application(&app)?;
    if let Some(acs) = request.acs_url.as_deref()
        && acs != sp.acs_url
    {
        return Err(SamlError::InvalidRequest(format!(
            "AssertionConsumerServiceURL {acs} is not registered for {}",
            sp.entity_id
        ))
        .into());
    }

    let user = require_user(state, headers, jar).await?;
    let built = builder.build_response(&user.principal, &sp, Some(&request.id))?;
    info!(
        user_id = %user.principal.id,
        sp = sp.entity_id,
        request_id = %request.id,
        response_id = %built.response_id,
        "SAML response issued"
    );
    Ok(html(auto_post_form(
        sp.acs_url,
        "SAMLResponse",
        &built.to_base64(),
        message.relay_state.as_deref(),
    )))
}

/// `GET /saml/sso`: HTTP-Redirect binding.
pub async fn sso_redirect_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(message): Query<SamlMessage>,
) -> AppResult<Response> {
    single_sign_on(&state, &headers, &jar, message, Binding::Redirect).await
}

/// `POST /saml/sso`: HTTP-POST binding.
pub async fn sso_post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(message): Form<SamlMessage>,
) -> AppResult<Response> {
    single_sign_on(&state, &headers, &jar, message, Binding::Post).await
}

/// Answer an SP `LogoutRequest`, or log out locally when none was sent.
async fn single_logout(
    state: &AppState,
    jar: CookieJar,
    message: SamlMessage,
    binding: Binding,
) -> AppResult<(CookieJar, Response)> {
    let Some(encoded) = non_empty(message.saml_request) else {
        end_browser_session(state, &jar).await?;
        let jar = jar.add(cookies::clear_session_cookie(&state.config.session));
        let body = Json(LogoutStatus {
            success: true,
            message: "Logged out".into(),
        });
        return Ok((jar, body.into_response()));
    };

    // The issuer must be a registered SP before the session is touched.
    let request = parse_logout_request(&decode(&encoded, binding)?)?;
    let builder = builder(state)?;
    let app = registered_sp(state, &request.issuer).await?;

    end_browser_session(state, &jar).await?;
    let jar = jar.add(cookies::clear_session_cookie(&state.config.session));

    let destination = app.slo_url.as_deref().filter(|u| !u.is_empty());
    let document = builder.build_logout_response(&request.id, destination, true)?;
    info!(sp = %request.issuer, request_id = %request.id, "SAML single logout");

    let response = match destination {
        Some(slo_url) => html(auto_post_form(
            slo_url,
            "SAMLResponse",
            &STANDARD.encode(document.as_bytes()),
            message.relay_state.as_deref(),
        )),
        None => xml(document),
    };
    Ok((jar, response))
}

/// `GET /saml/sls`
pub async fn sls_redirect_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(message): Query<SamlMessage>,
) -> AppResult<(CookieJar, Response)> {
    single_logout(&state, jar, message, Binding::Redirect).await
}

/// `POST /saml/sls`
pub async fn sls_post_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(message): Form<SamlMessage>,
) -> AppResult<(CookieJar, Response)> {
    single_logout(&state, jar, message, Binding::Post).await
}
