//! PostgreSQL application registry.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use super::{ApplicationStore, best_cas_match};
use crate::deadline::within;
use crate::models::application::{Application, AttributeMapping, Protocol};
use crate::store::StoreError;

type AppRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Vec<String>,
    Option<String>,
);

const APP_COLUMNS: &str = "id::text, name, protocol, status, service_url, entity_id, acs_url, \
     slo_url, home_page_url, redirect_uris, attribute_mapping::text";

#[derive(Clone)]
pub struct PgApplicationStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgApplicationStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn fetch(&self, sql: &str, arg: &str) -> Result<Vec<Application>, StoreError> {
        let rows = within(self.timeout, async {
            Ok::<_, StoreError>(
                sqlx::query_as::<_, AppRow>(sql)
                    .bind(arg)
                    .fetch_all(&self.pool)
                    .await?,
            )
        })
        .await?;
        Ok(rows.into_iter().map(app_from_row).collect())
    }
}

fn app_from_row(row: AppRow) -> Application {
    let (
        id,
        name,
        protocol,
        status,
        service_url,
        entity_id,
        acs_url,
        slo_url,
        home_page_url,
        redirect_uris,
        mapping,
    ) = row;
    let attribute_mapping = match mapping.as_deref().map(AttributeMapping::from_json) {
        None => AttributeMapping::default(),
        Some(Ok(m)) => m,
        Some(Err(e)) => {
            warn!(app_id = %id, error = %e, "unreadable attribute mapping, using defaults");
            AttributeMapping::default()
        }
    };
    Application {
        id,
        name,
        protocol: Protocol::parse(&protocol),
        active: status == "active",
        service_url,
        entity_id,
        acs_url,
        slo_url,
        home_page_url,
        redirect_uris,
        attribute_mapping,
    }
}

#[async_trait]
impl ApplicationStore for PgApplicationStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Application>, StoreError> {
        let sql = format!("SELECT {APP_COLUMNS} FROM applications WHERE id::text = $1");
        Ok(self.fetch(&sql, id).await?.into_iter().next())
    }

    async fn find_cas_service(&self, service: &str) -> Result<Option<Application>, StoreError> {
        let sql = format!(
            "SELECT {APP_COLUMNS} FROM applications \
             WHERE protocol = 'cas' AND status = 'active' \
               AND service_url IS NOT NULL AND starts_with($1, service_url)"
        );
        Ok(best_cas_match(self.fetch(&sql, service).await?, service))
    }

    async fn find_by_entity_id(&self, entity_id: &str) -> Result<Option<Application>, StoreError> {
        let sql = format!(
            "SELECT {APP_COLUMNS} FROM applications \
             WHERE entity_id = $1 AND protocol IN ('saml', 'saml2') AND status = 'active'"
        );
        Ok(self.fetch(&sql, entity_id).await?.into_iter().next())
    }
}
