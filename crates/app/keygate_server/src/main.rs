//! Keygate identity provider server binary.
//!
//! Loads YAML configuration, wires the storage backends and serves the
//! CAS, SAML and token endpoints until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use keygate_api::{AppState, Backends};
use keygate_core::apps::queries::PgApplicationStore;
use keygate_core::apps::{ApplicationStore, MemoryApplicationStore};
use keygate_core::auth::jwt::TokenService;
use keygate_core::auth::queries::PgCredentialStore;
use keygate_core::auth::store::{CredentialStore, MemoryCredentialStore};
use keygate_core::cas::callback::HttpPgtCallback;
use keygate_core::cas::queries::PgTicketStore;
use keygate_core::cas::store::{MemoryTicketStore, TicketStore};
use keygate_core::config::{CacheBackend, IdpConfig};
use keygate_core::saml::assertion::AssertionBuilder;
use keygate_core::saml::credentials::SigningCredentials;
use keygate_core::session::cache::SessionCache;
use keygate_core::session::memory::MemoryCache;
use keygate_core::session::redis::RedisCache;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_LOG_FILTER: &str = "info,keygate_api=debug,keygate_core=debug";

/// How often expired tickets are purged from the durable audit table.
const TICKET_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// CLI arguments for the identity provider.
#[derive(Parser, Debug)]
#[command(name = "keygate_server", about = "Keygate identity provider")]
struct Args {
    /// YAML configuration file. Environment variables override its values.
    #[arg(long, short, env = "KEYGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding `server.bind_addr`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();

    let mut config = IdpConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }

    info!(
        bind_addr = %config.server.bind_addr,
        base_url = %config.server.base_url,
        "starting keygate_server"
    );

    let (credentials, applications, tickets) = durable_stores(&config).await?;

    let cache: Arc<dyn SessionCache> = match config.cache.backend {
        CacheBackend::Redis => {
            info!("connecting to session cache");
            Arc::new(RedisCache::connect(&config.cache.redis_url).await?)
        }
        CacheBackend::Memory => {
            warn!("using in-process session cache; sessions are not shared between instances");
            Arc::new(MemoryCache::new())
        }
    };

    let pgt_callback = Arc::new(HttpPgtCallback::new(Duration::from_secs(
        config.cas.callback_timeout_secs,
    ))?);

    let tokens = TokenService::from_config(&config.jwt);
    let saml = saml_builder(&config);

    let backends = Backends {
        credentials,
        applications,
        tickets,
        cache,
        pgt_callback,
    };
    let state = AppState::new(config, backends, tokens, saml);

    let shutdown = CancellationToken::new();
    let sweeper = state.sessions.spawn_sweeper(
        Duration::from_secs(state.config.session.sweep_interval_secs),
        shutdown.clone(),
    );
    let cleanup = state
        .tickets
        .spawn_cleanup(TICKET_CLEANUP_INTERVAL, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&state.config.server.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "identity provider listening");

    let app = keygate_api::router(state);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await;

    shutdown.cancel();
    let _ = sweeper.await;
    let _ = cleanup.await;
    info!("keygate_server stopped");

    result?;
    Ok(())
}

type DurableStores = (
    Arc<dyn CredentialStore>,
    Arc<dyn ApplicationStore>,
    Arc<dyn TicketStore>,
);

/// PostgreSQL-backed stores when a database is configured, in-memory ones otherwise.
async fn durable_stores(config: &IdpConfig) -> Result<DurableStores, Box<dyn std::error::Error>> {
    let Some(url) = config.database.url.as_deref() else {
        warn!("no database configured; users, applications and ticket audit are in-memory");
        return Ok((
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(MemoryApplicationStore::new()),
            Arc::new(MemoryTicketStore::new()),
        ));
    };

    info!(
        max_connections = config.database.max_connections,
        "configuring connection pool"
    );
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(url)
        .await?;

    info!("running database migrations");
    keygate_api::migrate(&pool).await?;

    let timeout = config.database.op_timeout();
    Ok((
        Arc::new(PgCredentialStore::new(pool.clone(), timeout)),
        Arc::new(PgApplicationStore::new(pool.clone(), timeout)),
        Arc::new(PgTicketStore::new(pool, timeout)),
    ))
}

/// A SAML start-up failure disables SAML only; CAS and tokens keep serving.
fn saml_builder(config: &IdpConfig) -> Option<Arc<AssertionBuilder>> {
    if !config.saml.enabled {
        info!("SAML disabled by configuration");
        return None;
    }
    let entity_id = config.saml_entity_id();
    match SigningCredentials::load_or_generate(&config.saml, &entity_id) {
        Ok(credentials) => {
            info!(entity_id = %entity_id, "SAML signing credentials ready");
            Some(Arc::new(AssertionBuilder::new(entity_id, Arc::new(credentials))))
        }
        Err(e) => {
            error!(error = %e, "SAML signing credentials unavailable; SAML endpoints disabled");
            None
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
