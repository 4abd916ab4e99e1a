//! Ticket records and the in-process fast tier.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Ticket family, encoded in the id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketKind {
    Service,
    Proxy,
    ProxyGranting,
}

impl TicketKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            TicketKind::Service => "ST-",
            TicketKind::Proxy => "PT-",
            TicketKind::ProxyGranting => "PGT-",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketKind::Service => "ST",
            TicketKind::Proxy => "PT",
            TicketKind::ProxyGranting => "PGT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ST" => Some(TicketKind::Service),
            "PT" => Some(TicketKind::Proxy),
            "PGT" => Some(TicketKind::ProxyGranting),
            _ => None,
        }
    }
}

/// A CAS ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub kind: TicketKind,
    /// Service the ticket is bound to. For a PGT, the callback URL it was
    /// delivered to.
    pub service: String,
    pub user_id: String,
    pub username: String,
    /// PT: the PGT it was minted from. PGT: the ticket whose validation granted it.
    pub parent: Option<String>,
    /// Proxy callback URLs traversed, most recent first.
    pub proxies: Vec<String>,
    pub from_new_login: bool,
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Ticket {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Result of a consume attempt against the fast tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheConsume {
    /// Not held in this process.
    Miss,
    /// This call flipped the ticket to used; the ticket as issued.
    Consumed(Ticket),
    /// Already used by an earlier attempt.
    AlreadyUsed,
}

/// In-process ticket tier.
///
/// Check-and-mark runs under the map's per-key lock, so at most one
/// caller observes [`CacheConsume::Consumed`] for a given id.
#[derive(Debug, Default)]
pub struct TicketCache {
    tickets: DashMap<String, Ticket>,
}

impl TicketCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ticket: Ticket) {
        self.tickets.insert(ticket.id.clone(), ticket);
    }

    /// Mark a ticket used, whatever its validity.
    pub fn consume(&self, id: &str) -> CacheConsume {
        match self.tickets.get_mut(id) {
            None => CacheConsume::Miss,
            Some(mut entry) => {
                if entry.used {
                    return CacheConsume::AlreadyUsed;
                }
                entry.used = true;
                let mut issued = entry.value().clone();
                issued.used = false;
                CacheConsume::Consumed(issued)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Drop tickets past expiry; they can no longer validate.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.tickets.len();
        self.tickets.retain(|_, t| !t.is_expired(now));
        before - self.tickets.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    pub(crate) fn ticket(id: &str, kind: TicketKind, service: &str, ttl_secs: i64) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: id.into(),
            kind,
            service: service.into(),
            user_id: "u-1".into(),
            username: "alice".into(),
            parent: None,
            proxies: vec![],
            from_new_login: true,
            used: false,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_secs),
        }
    }

    #[test]
    fn consume_is_single_shot() {
        let cache = TicketCache::new();
        cache.insert(ticket("ST-1", TicketKind::Service, "https://sp", 300));
        assert!(matches!(cache.consume("ST-1"), CacheConsume::Consumed(t) if !t.used));
        assert_eq!(cache.consume("ST-1"), CacheConsume::AlreadyUsed);
        assert_eq!(cache.consume("ST-2"), CacheConsume::Miss);
    }

    #[test]
    fn concurrent_consumers_see_one_winner() {
        let cache = Arc::new(TicketCache::new());
        cache.insert(ticket("ST-race", TicketKind::Service, "https://sp", 300));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || matches!(cache.consume("ST-race"), CacheConsume::Consumed(_)))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn purge_drops_expired() {
        let cache = TicketCache::new();
        cache.insert(ticket("ST-old", TicketKind::Service, "s", -1));
        cache.insert(ticket("ST-new", TicketKind::Service, "s", 300));
        assert_eq!(cache.purge_expired(Utc::now()), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn kind_round_trip() {
        for kind in [TicketKind::Service, TicketKind::Proxy, TicketKind::ProxyGranting] {
            assert_eq!(TicketKind::parse(kind.as_str()), Some(kind));
        }
    }
}
