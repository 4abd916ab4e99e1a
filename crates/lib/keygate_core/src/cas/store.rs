//! Durable ticket tier contract and its in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::ticket::Ticket;
use crate::store::StoreError;

/// Outcome of a compare-and-set consume against the durable tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConsume {
    /// The row flipped from unused to used in this call; the ticket as issued.
    Consumed(Ticket),
    AlreadyUsed,
    Missing,
}

/// Persistent ticket table, shared across IdP instances.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert(&self, ticket: &Ticket) -> Result<(), StoreError>;

    /// Atomically set `used` where it is still false.
    async fn consume(&self, id: &str) -> Result<StoreConsume, StoreError>;

    /// Delete rows that expired before `before`.
    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Ticket table held in process memory (single-node deployments, tests).
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    rows: Mutex<HashMap<String, Ticket>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, HashMap<String, Ticket>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Row as stored, for inspection.
    pub fn get(&self, id: &str) -> Option<Ticket> {
        self.rows().get(id).cloned()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn insert(&self, ticket: &Ticket) -> Result<(), StoreError> {
        self.rows().insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    async fn consume(&self, id: &str) -> Result<StoreConsume, StoreError> {
        let mut rows = self.rows();
        Ok(match rows.get_mut(id) {
            None => StoreConsume::Missing,
            Some(row) if row.used => StoreConsume::AlreadyUsed,
            Some(row) => {
                let issued = row.clone();
                row.used = true;
                StoreConsume::Consumed(issued)
            }
        })
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.rows();
        let count = rows.len();
        rows.retain(|_, t| t.expires_at >= before);
        Ok((count - rows.len()) as u64)
    }
}
