//! PostgreSQL ticket table.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::store::{StoreConsume, TicketStore};
use super::ticket::{Ticket, TicketKind};
use crate::deadline::within;
use crate::store::StoreError;

type TicketRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Vec<String>,
    bool,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn ticket_from_row(row: TicketRow) -> Result<Ticket, StoreError> {
    let (
        id,
        kind,
        service,
        user_id,
        username,
        parent,
        proxies,
        from_new_login,
        used,
        created_at,
        expires_at,
    ) = row;
    let kind = TicketKind::parse(&kind)
        .ok_or_else(|| StoreError::Corrupt(format!("ticket {id} has kind {kind}")))?;
    Ok(Ticket {
        id,
        kind,
        service,
        user_id,
        username,
        parent,
        proxies,
        from_new_login,
        used,
        created_at,
        expires_at,
    })
}

/// Ticket store over the `cas_tickets` table.
#[derive(Clone)]
pub struct PgTicketStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgTicketStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn insert(&self, ticket: &Ticket) -> Result<(), StoreError> {
        within(self.timeout, async {
            sqlx::query(
                "INSERT INTO cas_tickets \
                 (ticket, kind, service, user_id, username, parent, proxies, from_new_login, used, created_at, expires_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(&ticket.id)
            .bind(ticket.kind.as_str())
            .bind(&ticket.service)
            .bind(&ticket.user_id)
            .bind(&ticket.username)
            .bind(&ticket.parent)
            .bind(&ticket.proxies)
            .bind(ticket.from_new_login)
            .bind(ticket.used)
            .bind(ticket.created_at)
            .bind(ticket.expires_at)
            .execute(&self.pool)
            .await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn consume(&self, id: &str) -> Result<StoreConsume, StoreError> {
        within(self.timeout, async {
            let row = sqlx::query_as::<_, TicketRow>(
                "UPDATE cas_tickets SET used = true \
                 WHERE ticket = $1 AND used = false \
                 RETURNING ticket, kind, service, user_id, username, parent, proxies, \
                 from_new_login, false, created_at, expires_at",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                return Ok::<_, StoreError>(StoreConsume::Consumed(ticket_from_row(row)?));
            }
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM cas_tickets WHERE ticket = $1)",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
            Ok(if exists {
                StoreConsume::AlreadyUsed
            } else {
                StoreConsume::Missing
            })
        })
        .await
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        within(self.timeout, async {
            let result = sqlx::query("DELETE FROM cas_tickets WHERE expires_at < $1")
                .bind(before)
                .execute(&self.pool)
                .await?;
            Ok::<_, StoreError>(result.rows_affected())
        })
        .await
    }
}
