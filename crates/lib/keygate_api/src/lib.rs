//! # keygate_api
//!
//! HTTP front ends for Keygate: password login, CAS, SAML, application
//! launch and session administration.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use keygate_core::apps::ApplicationStore;
use keygate_core::auth::authenticator::Authenticator;
use keygate_core::auth::jwt::TokenService;
use keygate_core::auth::lockout::LockoutPolicy;
use keygate_core::auth::store::CredentialStore;
use keygate_core::cas::callback::PgtCallback;
use keygate_core::cas::manager::TicketManager;
use keygate_core::cas::store::TicketStore;
use keygate_core::config::IdpConfig;
use keygate_core::saml::assertion::AssertionBuilder;
use keygate_core::session::SessionStore;
use keygate_core::session::cache::SessionCache;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{apps, auth, cas, saml, sessions};

/// Storage and delivery backends the services are built on.
pub struct Backends {
    pub credentials: Arc<dyn CredentialStore>,
    pub applications: Arc<dyn ApplicationStore>,
    pub tickets: Arc<dyn TicketStore>,
    pub cache: Arc<dyn SessionCache>,
    pub pgt_callback: Arc<dyn PgtCallback>,
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IdpConfig>,
    pub tokens: TokenService,
    pub sessions: SessionStore,
    pub authenticator: Authenticator,
    pub tickets: TicketManager,
    pub apps: Arc<dyn ApplicationStore>,
    /// `None` when signing credentials could not be loaded; SAML endpoints
    /// then answer 503 and every other protocol keeps working.
    pub saml: Option<Arc<AssertionBuilder>>,
}

impl AppState {
    pub fn new(
        config: IdpConfig,
        backends: Backends,
        tokens: TokenService,
        saml: Option<Arc<AssertionBuilder>>,
    ) -> Self {
        let sessions = SessionStore::new(
            backends.cache,
            config.cache.op_timeout(),
            config.session.allow_multi_device_login,
        );
        let authenticator = Authenticator::new(
            backends.credentials,
            LockoutPolicy::from_config(&config.login),
            config.login.enable_otp,
        );
        let tickets = TicketManager::new(
            backends.tickets,
            backends.pgt_callback,
            &config.cas,
            config.database.op_timeout(),
        );
        Self {
            config: Arc::new(config),
            tokens,
            sessions,
            authenticator,
            tickets,
            apps: backends.applications,
            saml,
        }
    }
}

/// Run embedded database migrations.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    keygate_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required); browser flows resolve the session
    // themselves.
    let public = Router::new()
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route(
            "/cas/login",
            get(cas::login_page_handler).post(cas::login_submit_handler),
        )
        .route("/cas/logout", get(cas::logout_handler))
        .route("/cas/validate", get(cas::validate_handler))
        .route("/cas/serviceValidate", get(cas::service_validate_handler))
        .route("/cas/proxyValidate", get(cas::proxy_validate_handler))
        .route("/cas/p3/serviceValidate", get(cas::p3_service_validate_handler))
        .route("/cas/p3/proxyValidate", get(cas::p3_proxy_validate_handler))
        .route("/cas/proxy", get(cas::proxy_handler))
        .route("/saml/metadata", get(saml::metadata_handler))
        .route(
            "/saml/sso",
            get(saml::sso_redirect_handler).post(saml::sso_post_handler),
        )
        .route(
            "/saml/sls",
            get(saml::sls_redirect_handler).post(saml::sls_post_handler),
        )
        .route("/apps/{id}/launch", get(apps::launch_handler));

    // Protected routes (require auth)
    let protected = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/sessions", get(sessions::list_sessions_handler))
        .route("/auth/sessions/{id}", delete(sessions::revoke_session_handler))
        .route(
            "/admin/users/{id}/logout",
            post(sessions::force_logout_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
