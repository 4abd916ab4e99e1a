//! Two-tier ticket manager.
//!
//! The in-process [`TicketCache`] is authoritative for a ticket's lifetime
//! on the instance that issued it; the [`TicketStore`] is the durable
//! mirror and the fallback for tickets issued elsewhere. Callers only see
//! issue and [`TicketManager::validate_and_consume`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::CasError;
use super::callback::PgtCallback;
use super::store::{StoreConsume, TicketStore};
use super::ticket::{CacheConsume, Ticket, TicketCache, TicketKind};
use crate::config::CasConfig;
use crate::deadline::within;
use crate::ids::prefixed_token;

/// Random bytes per ticket id.
const TICKET_ENTROPY_BYTES: usize = 32;

/// How long expired rows stay in the durable tier for audit.
const AUDIT_RETENTION_DAYS: i64 = 7;

/// Ticket lifetimes.
#[derive(Debug, Clone, Copy)]
pub struct TicketTtls {
    pub service: chrono::Duration,
    pub proxy: chrono::Duration,
    pub proxy_granting: chrono::Duration,
}

impl TicketTtls {
    pub fn from_config(config: &CasConfig) -> Self {
        Self {
            service: chrono::Duration::seconds(config.service_ticket_ttl_secs),
            proxy: chrono::Duration::seconds(config.proxy_ticket_ttl_secs),
            proxy_granting: chrono::Duration::seconds(config.proxy_granting_ticket_ttl_secs),
        }
    }
}

/// Whose identity a new ticket carries.
#[derive(Debug, Clone, Copy)]
pub struct TicketSubject<'a> {
    pub user_id: &'a str,
    pub username: &'a str,
}

/// A PGT handed to the callback and the IOU returned to the service.
#[derive(Debug, Clone)]
pub struct GrantedPgt {
    pub pgt: Ticket,
    pub iou: String,
}

/// Issues and redeems CAS tickets.
#[derive(Clone)]
pub struct TicketManager {
    cache: Arc<TicketCache>,
    store: Arc<dyn TicketStore>,
    callback: Arc<dyn PgtCallback>,
    ttls: TicketTtls,
    allow_insecure_callback: bool,
    store_timeout: Duration,
}

impl TicketManager {
    pub fn new(
        store: Arc<dyn TicketStore>,
        callback: Arc<dyn PgtCallback>,
        config: &CasConfig,
        store_timeout: Duration,
    ) -> Self {
        Self {
            cache: Arc::new(TicketCache::new()),
            store,
            callback,
            ttls: TicketTtls::from_config(config),
            allow_insecure_callback: config.allow_insecure_pgt_url,
            store_timeout,
        }
    }

    fn mint(
        &self,
        kind: TicketKind,
        subject: TicketSubject<'_>,
        service: &str,
        ttl: chrono::Duration,
    ) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: prefixed_token(kind.prefix(), TICKET_ENTROPY_BYTES),
            kind,
            service: service.to_string(),
            user_id: subject.user_id.to_string(),
            username: subject.username.to_string(),
            parent: None,
            proxies: Vec::new(),
            from_new_login: false,
            used: false,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Cache first, then mirror to the durable tier. Mirror failures are
    /// logged and do not fail issuance.
    async fn persist(&self, ticket: &Ticket) {
        self.cache.insert(ticket.clone());
        if let Err(e) = within(self.store_timeout, self.store.insert(ticket)).await {
            warn!(kind = ticket.kind.as_str(), error = %e, "ticket mirror write failed");
        }
    }

    /// Mint a service ticket for `service`.
    pub async fn issue_service_ticket(
        &self,
        subject: TicketSubject<'_>,
        service: &str,
        from_new_login: bool,
    ) -> Ticket {
        let mut ticket = self.mint(TicketKind::Service, subject, service, self.ttls.service);
        ticket.from_new_login = from_new_login;
        self.persist(&ticket).await;
        info!(username = subject.username, service, "service ticket issued");
        ticket
    }

    /// Redeem a ticket exactly once.
    ///
    /// Any attempt on an existing ticket consumes it, so a ticket presented
    /// with the wrong service or at the wrong endpoint is burned. Every
    /// rejection reason collapses into [`CasError::TicketInvalid`].
    pub async fn validate_and_consume(
        &self,
        ticket_id: &str,
        service: Option<&str>,
        accepted: &[TicketKind],
    ) -> Result<Ticket, CasError> {
        let ticket = match self.cache.consume(ticket_id) {
            CacheConsume::Consumed(ticket) => {
                // Another instance may have redeemed the durable copy.
                match within(self.store_timeout, self.store.consume(ticket_id)).await {
                    Ok(StoreConsume::AlreadyUsed) => {
                        warn!(kind = ticket.kind.as_str(), "ticket already redeemed on another instance");
                        return Err(CasError::TicketInvalid);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "ticket used-flag propagation failed"),
                }
                ticket
            }
            CacheConsume::AlreadyUsed => {
                debug!("ticket replay rejected");
                return Err(CasError::TicketInvalid);
            }
            CacheConsume::Miss => {
                match within(self.store_timeout, self.store.consume(ticket_id)).await? {
                    StoreConsume::Consumed(ticket) => {
                        let mut used = ticket.clone();
                        used.used = true;
                        self.cache.insert(used);
                        ticket
                    }
                    StoreConsume::AlreadyUsed | StoreConsume::Missing => {
                        return Err(CasError::TicketInvalid);
                    }
                }
            }
        };

        let now = Utc::now();
        if ticket.is_expired(now) {
            debug!("expired ticket presented");
            return Err(CasError::TicketInvalid);
        }
        if !accepted.contains(&ticket.kind) {
            debug!(kind = ticket.kind.as_str(), "ticket presented at wrong endpoint");
            return Err(CasError::TicketInvalid);
        }
        if let Some(service) = service
            && service != ticket.service
        {
            warn!(
                bound = %ticket.service,
                presented = service,
                "ticket presented for a different service"
            );
            return Err(CasError::TicketInvalid);
        }
        Ok(ticket)
    }

    /// Check a proxy callback URL against policy.
    pub fn check_callback_url(&self, pgt_url: &str) -> Result<Url, CasError> {
        let url = Url::parse(pgt_url)
            .map_err(|e| CasError::InvalidProxyCallback(format!("{pgt_url}: {e}")))?;
        match url.scheme() {
            "https" => Ok(url),
            "http" if self.allow_insecure_callback => Ok(url),
            other => Err(CasError::InvalidProxyCallback(format!(
                "scheme {other} not allowed for {pgt_url}"
            ))),
        }
    }

    /// Grant a PGT for a just-validated ticket.
    ///
    /// The PGT is delivered to `pgt_url` first and only stored once the
    /// callback answered; on failure nothing is granted.
    pub async fn grant_proxy_granting_ticket(
        &self,
        validated: &Ticket,
        pgt_url: &str,
    ) -> Result<GrantedPgt, CasError> {
        let url = self.check_callback_url(pgt_url)?;
        let subject = TicketSubject {
            user_id: &validated.user_id,
            username: &validated.username,
        };
        let mut pgt = self.mint(
            TicketKind::ProxyGranting,
            subject,
            url.as_str(),
            self.ttls.proxy_granting,
        );
        pgt.parent = Some(validated.id.clone());
        pgt.proxies = validated.proxies.clone();
        let iou = prefixed_token("PGTIOU-", TICKET_ENTROPY_BYTES);

        self.callback
            .deliver(&url, &pgt.id, &iou)
            .await
            .map_err(|e| CasError::InvalidProxyCallback(e.to_string()))?;

        self.persist(&pgt).await;
        info!(username = %pgt.username, callback = %url, "proxy-granting ticket issued");
        Ok(GrantedPgt { pgt, iou })
    }

    /// Exchange a PGT for a proxy ticket to `target_service`.
    pub async fn issue_proxy_ticket(
        &self,
        pgt_id: &str,
        target_service: &str,
    ) -> Result<Ticket, CasError> {
        let pgt = self
            .validate_and_consume(pgt_id, None, &[TicketKind::ProxyGranting])
            .await?;
        let subject = TicketSubject {
            user_id: &pgt.user_id,
            username: &pgt.username,
        };
        let mut pt = self.mint(TicketKind::Proxy, subject, target_service, self.ttls.proxy);
        pt.parent = Some(pgt.id.clone());
        pt.proxies = std::iter::once(pgt.service.clone())
            .chain(pgt.proxies.iter().cloned())
            .collect();
        self.persist(&pt).await;
        info!(username = %pt.username, service = target_service, "proxy ticket issued");
        Ok(pt)
    }

    /// Purge expired tickets from both tiers every `every` until `shutdown`.
    pub fn spawn_cleanup(
        &self,
        every: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let now = Utc::now();
                        let purged = manager.cache.purge_expired(now);
                        if purged > 0 {
                            debug!(purged, "expired tickets purged from cache");
                        }
                        let cutoff = now - chrono::Duration::days(AUDIT_RETENTION_DAYS);
                        if let Err(e) = within(manager.store_timeout, manager.store.purge_expired(cutoff)).await {
                            warn!(error = %e, "ticket table purge failed");
                        }
                    }
                }
            }
        })
    }
}
