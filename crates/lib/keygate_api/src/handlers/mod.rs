//! Request handlers, one module per surface.

pub mod apps;
pub mod auth;
pub mod cas;
pub mod saml;
pub mod sessions;

use axum::http::StatusCode;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use axum::response::{IntoResponse, Response};

/// `302 Found` to `location`, as CAS and SAML clients expect.
pub(crate) fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(LOCATION, location.to_string()), (CACHE_CONTROL, "no-store".into())],
    )
        .into_response()
}

pub(crate) fn xml(body: String) -> Response {
    ([(CONTENT_TYPE, "application/xml; charset=utf-8")], body).into_response()
}

pub(crate) fn html(body: String) -> Response {
    (
        [
            (CONTENT_TYPE, "text/html; charset=utf-8"),
            (CACHE_CONTROL, "no-store"),
        ],
        body,
    )
        .into_response()
}

/// Treat empty query values as absent.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// CAS boolean parameters (`renew`, `gateway`).
pub(crate) fn flag(value: Option<&str>) -> bool {
    matches!(value, Some("true") | Some("1"))
}
