//! CAS 1.0/2.0/3.0 endpoints.
//!
//! Validation endpoints never answer with JSON errors: every failure is
//! rendered as the protocol's own failure document.

use axum::Json;
use axum::extract::{Form, Query, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use keygate_core::attributes::resolve;
use keygate_core::auth::authenticator::Credentials;
use keygate_core::cas::CasError;
use keygate_core::cas::manager::TicketSubject;
use keygate_core::cas::response::{
    self, AuthenticationSuccess, FailureCode, Format, validate_v1,
};
use keygate_core::cas::ticket::TicketKind;
use keygate_core::models::application::Application;
use keygate_core::models::auth::Principal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{flag, found, non_empty, xml};
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::services::auth::{self, current_user, end_browser_session};
use crate::services::client::Client;
use crate::services::cookies;

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    pub service: Option<String>,
    pub renew: Option<String>,
    pub gateway: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub otp_code: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutQuery {
    pub service: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidateQuery {
    pub service: Option<String>,
    pub ticket: Option<String>,
    #[serde(rename = "pgtUrl")]
    pub pgt_url: Option<String>,
    pub renew: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProxyQuery {
    pub pgt: Option<String>,
    #[serde(rename = "targetService")]
    pub target_service: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginStatus {
    pub authenticated: bool,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutStatus {
    pub success: bool,
    pub message: String,
}

type Failure = (FailureCode, String);

pub(crate) fn subject(principal: &Principal) -> TicketSubject<'_> {
    TicketSubject {
        user_id: &principal.id,
        username: &principal.username,
    }
}

/// `service` with `ticket=<id>` appended to its query.
pub(crate) fn with_ticket(service: &str, ticket: &str) -> AppResult<String> {
    let mut url = Url::parse(service)
        .map_err(|e| AppError::Validation(format!("Invalid service URL: {e}")))?;
    url.query_pairs_mut().append_pair("ticket", ticket);
    Ok(url.into())
}

async fn registered_service(state: &AppState, service: &str) -> AppResult<Application> {
    state
        .apps
        .find_cas_service(service)
        .await?
        .ok_or_else(|| AppError::from(CasError::ServiceNotRegistered(service.to_string())))
}

async fn redirect_with_service_ticket(
    state: &AppState,
    principal: &Principal,
    service: &str,
    from_new_login: bool,
) -> AppResult<Response> {
    let ticket = state
        .tickets
        .issue_service_ticket(subject(principal), service, from_new_login)
        .await;
    Ok(found(&with_ticket(service, &ticket.id)?))
}

/// `GET /cas/login`: reuse an existing session, pass through on
/// `gateway`, or ask for credentials.
pub async fn login_page_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> AppResult<Response> {
    let service = non_empty(query.service);
    if let Some(service) = service.as_deref() {
        registered_service(&state, service).await?;
    }

    if !flag(query.renew.as_deref())
        && let Some(user) = current_user(&state, &headers, &jar).await?
    {
        return match service.as_deref() {
            Some(service) => {
                redirect_with_service_ticket(&state, &user.principal, service, false).await
            }
            None => Ok(Json(LoginStatus {
                authenticated: true,
                username: user.principal.username,
            })
            .into_response()),
        };
    }

    if flag(query.gateway.as_deref())
        && let Some(service) = service.as_deref()
    {
        debug!(service, "gateway login without session");
        return Ok(found(service));
    }

    Err(AppError::login_required())
}

/// `POST /cas/login`: check credentials, open a session and redirect back
/// with a fresh service ticket.
pub async fn login_submit_handler(
    State(state): State<AppState>,
    Client(client): Client,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> AppResult<(CookieJar, Response)> {
    let service = non_empty(form.service);
    if let Some(service) = service.as_deref() {
        registered_service(&state, service).await?;
    }

    let credentials = Credentials {
        login: &form.username,
        password: &form.password,
        otp_code: form.otp_code.as_deref(),
    };
    let outcome = auth::login(&state, credentials, &client, "cas").await?;
    let jar = jar.add(cookies::session_cookie(
        &state.config.session,
        &outcome.session.session_id,
    ));

    let response = match service.as_deref() {
        Some(service) => {
            redirect_with_service_ticket(&state, &outcome.principal, service, true).await?
        }
        None => Json(outcome.tokens).into_response(),
    };
    Ok((jar, response))
}

/// `GET /cas/logout`: end the browser session. Redirects only to
/// registered services.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<LogoutQuery>,
) -> AppResult<(CookieJar, Response)> {
    end_browser_session(&state, &jar).await?;
    let jar = jar.add(cookies::clear_session_cookie(&state.config.session));

    if let Some(service) = non_empty(query.service) {
        if state.apps.find_cas_service(&service).await?.is_some() {
            return Ok((jar, found(&service)));
        }
        warn!(service = %service, "logout redirect to unregistered service ignored");
    }
    let body = Json(LogoutStatus {
        success: true,
        message: "Logged out".into(),
    });
    Ok((jar, body.into_response()))
}

/// `GET /cas/validate`: CAS 1.0 plain text.
pub async fn validate_handler(
    State(state): State<AppState>,
    Query(query): Query<ValidateQuery>,
) -> Response {
    let plain = |body: String| ([(CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response();
    let (Some(service), Some(ticket_id)) = (non_empty(query.service), non_empty(query.ticket))
    else {
        return plain(validate_v1(None));
    };
    match state
        .tickets
        .validate_and_consume(&ticket_id, Some(&service), &[TicketKind::Service])
        .await
    {
        Ok(ticket) if flag(query.renew.as_deref()) && !ticket.from_new_login => {
            plain(validate_v1(None))
        }
        Ok(ticket) => {
            info!(username = %ticket.username, service = %service, "CAS 1.0 ticket validated");
            plain(validate_v1(Some(&ticket.username)))
        }
        Err(e) => {
            debug!(error = %e, "CAS 1.0 validation failed");
            plain(validate_v1(None))
        }
    }
}

fn failure_from(e: CasError, ticket_id: &str) -> Failure {
    match e {
        CasError::TicketInvalid => (
            FailureCode::InvalidTicket,
            format!("Ticket '{ticket_id}' not recognized"),
        ),
        CasError::ServiceNotRegistered(s) => (
            FailureCode::InvalidService,
            format!("Service '{s}' is not registered"),
        ),
        CasError::InvalidRequest(m) => (FailureCode::InvalidRequest, m),
        CasError::InvalidProxyCallback(m) => (FailureCode::InvalidProxyCallback, m),
        CasError::Store(e) => {
            error!(error = %e, "ticket store failure during validation");
            (FailureCode::InternalError, "Ticket store unavailable".into())
        }
    }
}

fn internal(e: impl std::fmt::Display) -> Failure {
    error!(error = %e, "lookup failure during validation");
    (FailureCode::InternalError, "Internal error".into())
}

async fn authenticate_ticket(
    state: &AppState,
    query: ValidateQuery,
    accepted: &[TicketKind],
) -> Result<AuthenticationSuccess, Failure> {
    let (Some(service), Some(ticket_id)) = (non_empty(query.service), non_empty(query.ticket))
    else {
        return Err((
            FailureCode::InvalidRequest,
            "Both 'service' and 'ticket' parameters are required".into(),
        ));
    };

    let ticket = state
        .tickets
        .validate_and_consume(&ticket_id, Some(&service), accepted)
        .await
        .map_err(|e| failure_from(e, &ticket_id))?;
    if flag(query.renew.as_deref()) && !ticket.from_new_login {
        debug!(ticket = %ticket_id, "renew requested for a ticket from an existing session");
        return Err(failure_from(CasError::TicketInvalid, &ticket_id));
    }

    let app = state
        .apps
        .find_cas_service(&service)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            failure_from(CasError::ServiceNotRegistered(service.clone()), &ticket_id)
        })?;
    let principal = state
        .authenticator
        .store()
        .find_by_id(&ticket.user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            warn!(user_id = %ticket.user_id, "ticket subject no longer exists");
            failure_from(CasError::TicketInvalid, &ticket_id)
        })?;

    let mut attributes = resolve(&principal, &app.attribute_mapping);
    attributes.insert(
        "isFromNewLogin".into(),
        vec![ticket.from_new_login.to_string()],
    );

    let proxy_granting_ticket = match non_empty(query.pgt_url) {
        Some(pgt_url) => match state
            .tickets
            .grant_proxy_granting_ticket(&ticket, &pgt_url)
            .await
        {
            Ok(granted) => Some(granted.iou),
            Err(e) => {
                warn!(error = %e, "proxy-granting ticket not granted");
                None
            }
        },
        None => None,
    };

    info!(
        username = %ticket.username,
        service = %service,
        kind = ticket.kind.as_str(),
        "ticket validated"
    );
    Ok(AuthenticationSuccess {
        user: ticket.username,
        attributes,
        proxy_granting_ticket,
        proxies: ticket.proxies,
    })
}

async fn validation_document(
    state: &AppState,
    query: ValidateQuery,
    accepted: &[TicketKind],
) -> Response {
    let format = Format::from_param(query.format.as_deref());
    match (authenticate_ticket(state, query, accepted).await, format) {
        (Ok(success), Format::Xml) => xml(response::success_xml(&success)),
        (Ok(success), Format::Json) => Json(response::success_json(&success)).into_response(),
        (Err((code, desc)), Format::Xml) => xml(response::failure_xml(code, &desc)),
        (Err((code, desc)), Format::Json) => {
            Json(response::failure_json(code, &desc)).into_response()
        }
    }
}

const SERVICE_ONLY: &[TicketKind] = &[TicketKind::Service];
const SERVICE_OR_PROXY: &[TicketKind] = &[TicketKind::Service, TicketKind::Proxy];

/// `GET /cas/serviceValidate`
pub async fn service_validate_handler(
    State(state): State<AppState>,
    Query(query): Query<ValidateQuery>,
) -> Response {
    validation_document(&state, query, SERVICE_ONLY).await
}

/// `GET /cas/proxyValidate`: also accepts proxy tickets.
pub async fn proxy_validate_handler(
    State(state): State<AppState>,
    Query(query): Query<ValidateQuery>,
) -> Response {
    validation_document(&state, query, SERVICE_OR_PROXY).await
}

/// `GET /cas/p3/serviceValidate`
pub async fn p3_service_validate_handler(
    State(state): State<AppState>,
    Query(query): Query<ValidateQuery>,
) -> Response {
    validation_document(&state, query, SERVICE_ONLY).await
}

/// `GET /cas/p3/proxyValidate`
pub async fn p3_proxy_validate_handler(
    State(state): State<AppState>,
    Query(query): Query<ValidateQuery>,
) -> Response {
    validation_document(&state, query, SERVICE_OR_PROXY).await
}

async fn proxy_ticket_for(state: &AppState, query: ProxyQuery) -> Result<String, Failure> {
    let (Some(pgt), Some(target)) = (non_empty(query.pgt), non_empty(query.target_service))
    else {
        return Err((
            FailureCode::InvalidRequest,
            "Both 'pgt' and 'targetService' parameters are required".into(),
        ));
    };
    // Checked before redeeming so an unregistered target does not burn the PGT.
    if state
        .apps
        .find_cas_service(&target)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(failure_from(CasError::ServiceNotRegistered(target), &pgt));
    }
    let pt = state
        .tickets
        .issue_proxy_ticket(&pgt, &target)
        .await
        .map_err(|e| failure_from(e, &pgt))?;
    Ok(pt.id)
}

/// `GET /cas/proxy`: exchange a PGT for a proxy ticket.
pub async fn proxy_handler(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Response {
    let format = Format::from_param(query.format.as_deref());
    match (proxy_ticket_for(&state, query).await, format) {
        (Ok(pt), Format::Xml) => xml(response::proxy_success_xml(&pt)),
        (Ok(pt), Format::Json) => Json(response::proxy_success_json(&pt)).into_response(),
        (Err((code, desc)), Format::Xml) => xml(response::proxy_failure_xml(code, &desc)),
        (Err((code, desc)), Format::Json) => {
            Json(response::proxy_failure_json(code, &desc)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_is_appended_to_existing_query() {
        let url = with_ticket("https://sp.example.com/app?x=1", "ST-abc").unwrap();
        assert_eq!(url, "https://sp.example.com/app?x=1&ticket=ST-abc");
    }

    #[test]
    fn ticket_goes_before_fragment() {
        let url = with_ticket("https://sp.example.com/app#top", "ST-abc").unwrap();
        assert_eq!(url, "https://sp.example.com/app?ticket=ST-abc#top");
    }

    #[test]
    fn unparsable_service_is_rejected() {
        assert!(with_ticket("not a url", "ST-abc").is_err());
    }
}
