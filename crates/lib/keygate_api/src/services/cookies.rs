//! Session cookie: set and clear the httpOnly browser session id.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use keygate_core::config::SessionConfig;
use time::Duration;

/// Cookie carrying the session id for browser SSO.
pub fn session_cookie(config: &SessionConfig, session_id: &str) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), session_id.to_string()))
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::seconds(config.ttl_secs))
        .build()
}

/// Expired cookie that clears the browser session.
pub fn clear_session_cookie(config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), String::new()))
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// Session id presented by the browser, if any.
pub fn session_id(config: &SessionConfig, jar: &CookieJar) -> Option<String> {
    jar.get(&config.cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
