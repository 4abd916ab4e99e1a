//! Registered applications: CAS services, SAML service providers and
//! launchable links.

pub mod queries;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::models::application::{Application, Protocol};
use crate::store::StoreError;

/// Read-only application registry.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Application>, StoreError>;

    /// The active CAS application a presented `service` belongs to. When
    /// several registered URLs match, the longest wins.
    async fn find_cas_service(&self, service: &str) -> Result<Option<Application>, StoreError>;

    /// The active SAML application registered under `entity_id`.
    async fn find_by_entity_id(&self, entity_id: &str) -> Result<Option<Application>, StoreError>;
}

/// Pick the most specific active CAS application matching `service`.
pub(crate) fn best_cas_match<I>(candidates: I, service: &str) -> Option<Application>
where
    I: IntoIterator<Item = Application>,
{
    candidates
        .into_iter()
        .filter(|app| app.active && app.protocol == Protocol::Cas && app.matches_service(service))
        .max_by_key(|app| app.service_url.as_deref().map_or(0, str::len))
}

/// Registry held in process memory.
#[derive(Debug, Default)]
pub struct MemoryApplicationStore {
    apps: DashMap<String, Application>,
}

impl MemoryApplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, app: Application) {
        self.apps.insert(app.id.clone(), app);
    }
}

#[async_trait]
impl ApplicationStore for MemoryApplicationStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Application>, StoreError> {
        Ok(self.apps.get(id).map(|a| a.value().clone()))
    }

    async fn find_cas_service(&self, service: &str) -> Result<Option<Application>, StoreError> {
        let candidates: Vec<Application> = self.apps.iter().map(|a| a.value().clone()).collect();
        Ok(best_cas_match(candidates, service))
    }

    async fn find_by_entity_id(&self, entity_id: &str) -> Result<Option<Application>, StoreError> {
        Ok(self
            .apps
            .iter()
            .find(|a| {
                a.active && a.protocol == Protocol::Saml && a.entity_id.as_deref() == Some(entity_id)
            })
            .map(|a| a.value().clone()))
    }
}
