//! Router over in-memory backends, plus request helpers.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use keygate_api::{AppState, Backends};
use keygate_core::apps::MemoryApplicationStore;
use keygate_core::auth::jwt::TokenService;
use keygate_core::auth::store::MemoryCredentialStore;
use keygate_core::cas::callback::{CallbackError, PgtCallback};
use keygate_core::cas::store::MemoryTicketStore;
use keygate_core::config::IdpConfig;
use keygate_core::models::application::{Application, AttributeMapping, Protocol};
use keygate_core::models::auth::{AccountStatus, Principal};
use keygate_core::saml::assertion::AssertionBuilder;
use keygate_core::saml::credentials::SigningCredentials;
use keygate_core::session::memory::MemoryCache;
use tower::ServiceExt;
use url::Url;

pub const PASSWORD: &str = "wonderland";
pub const CAS_SERVICE: &str = "https://sp.example.com";
pub const SP_ENTITY_ID: &str = "urn:sp:test";
pub const SP_ACS: &str = "https://sp.example.com/acs";
pub const SP_SLO: &str = "https://sp.example.com/slo";

/// Records PGT deliveries instead of calling out.
#[derive(Default)]
pub struct RecordingCallback {
    pub delivered: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl PgtCallback for RecordingCallback {
    async fn deliver(&self, pgt_url: &Url, pgt_id: &str, pgt_iou: &str) -> Result<(), CallbackError> {
        self.delivered
            .lock()
            .unwrap()
            .push((pgt_url.to_string(), pgt_id.to_string(), pgt_iou.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub app: Router,
    pub state: AppState,
    pub credentials: Arc<MemoryCredentialStore>,
    pub applications: Arc<MemoryApplicationStore>,
    pub callback: Arc<RecordingCallback>,
}

fn signing_credentials() -> Arc<SigningCredentials> {
    static CREDS: OnceLock<Arc<SigningCredentials>> = OnceLock::new();
    CREDS
        .get_or_init(|| Arc::new(SigningCredentials::generate("keygate-test").expect("generate")))
        .clone()
}

pub fn principal(id: &str, username: &str, roles: &[&str]) -> Principal {
    Principal {
        id: id.into(),
        username: username.into(),
        email: format!("{username}@example.com"),
        display_name: format!("{username} A"),
        status: AccountStatus::Active,
        password_hash: Some(bcrypt::hash(PASSWORD, 4).expect("hash")),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        permissions: vec!["apps:launch".into()],
        failed_login_count: 0,
        locked_until: None,
        otp_secret: None,
        last_login_at: None,
        last_login_ip: None,
    }
}

pub fn application(id: &str, protocol: Protocol) -> Application {
    Application {
        id: id.into(),
        name: format!("App {id}"),
        protocol,
        active: true,
        service_url: None,
        entity_id: None,
        acs_url: None,
        slo_url: None,
        home_page_url: None,
        redirect_uris: Vec::new(),
        attribute_mapping: AttributeMapping::default(),
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Same backends, but with SAML failed to start.
    pub fn without_saml() -> Self {
        Self::build(false)
    }

    fn build(with_saml: bool) -> Self {
        let mut config = IdpConfig::default();
        config.jwt.secret = "test-secret".into();
        config.server.base_url = "https://idp.example.com".into();

        let credentials = Arc::new(MemoryCredentialStore::new());
        credentials.insert(principal("u-alice", "alice", &["user"]));
        credentials.insert(principal("u-root", "root", &["admin"]));

        let applications = Arc::new(MemoryApplicationStore::new());
        let mut cas = application("cas-app", Protocol::Cas);
        cas.service_url = Some(CAS_SERVICE.into());
        applications.insert(cas);
        let mut portal = application("portal", Protocol::Cas);
        portal.service_url = Some("https://portal.example.com".into());
        applications.insert(portal);
        let mut saml = application("saml-app", Protocol::Saml);
        saml.entity_id = Some(SP_ENTITY_ID.into());
        saml.acs_url = Some(SP_ACS.into());
        saml.slo_url = Some(SP_SLO.into());
        applications.insert(saml);

        let callback = Arc::new(RecordingCallback::default());
        let tokens = TokenService::new(config.jwt.secret.as_bytes(), &config.jwt);
        let saml = with_saml.then(|| {
            Arc::new(AssertionBuilder::new(
                config.saml_entity_id(),
                signing_credentials(),
            ))
        });

        let backends = Backends {
            credentials: credentials.clone(),
            applications: applications.clone(),
            tickets: Arc::new(MemoryTicketStore::new()),
            cache: Arc::new(MemoryCache::new()),
            pgt_callback: callback.clone(),
        };
        let state = AppState::new(config, backends, tokens, saml);
        let app = keygate_api::router(state.clone());
        Self {
            app,
            state,
            credentials,
            applications,
            callback,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(req).await.expect("request")
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(&self, uri: &str, pairs: &[(&str, &str)], cookie: Option<&str>) -> Response<Body> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, json: serde_json::Value, bearer: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(json.to_string())).unwrap()).await
    }

    pub async fn with_bearer(&self, method: &str, uri: &str, token: &str) -> Response<Body> {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        self.send(req).await
    }

    /// Password login; returns the JSON body and the `name=value` cookie pair.
    pub async fn login(&self, username: &str) -> (serde_json::Value, String) {
        let resp = self
            .post_json(
                "/auth/login",
                serde_json::json!({ "username": username, "password": PASSWORD }),
                None,
            )
            .await;
        assert_eq!(resp.status(), 200, "login failed for {username}");
        let cookie = session_cookie(&resp).expect("session cookie");
        (body_json(resp).await, cookie)
    }
}

/// `name=value` of the session cookie set by a response.
pub fn session_cookie(resp: &Response<Body>) -> Option<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("keygate_session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub fn location(resp: &Response<Body>) -> String {
    resp.headers()
        .get(header::LOCATION)
        .expect("location header")
        .to_str()
        .unwrap()
        .to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub async fn body_text(resp: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_text(resp).await).expect("parse JSON")
}

/// Percent-encode one query value.
pub fn enc(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
