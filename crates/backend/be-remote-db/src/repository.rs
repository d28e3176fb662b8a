//! Repository contracts shared by the in-memory and Postgres stores.
//!
//! A missing record is `Ok(None)`, never an error.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    DatabaseManager, MemoryDatabase,
    error::DbResult,
    types::{Client, Deployment, DeploymentStatus, Device, Entity, Release, Update},
};

#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn get(&self, id: Uuid) -> DbResult<Option<T>>;

    /// All records, oldest first.
    async fn list(&self) -> DbResult<Vec<T>>;

    async fn create(&self, entity: T) -> DbResult<T>;

    /// Persist changes to an existing record. Fails with `NotFound` if the
    /// record is gone. Immutable columns are left untouched.
    async fn update(&self, entity: T) -> DbResult<T>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: Uuid) -> DbResult<bool>;
}

#[async_trait]
pub trait UpdateRepository: Repository<Update> {
    async fn get_by_version(&self, version: &str) -> DbResult<Option<Update>>;

    async fn list_active(&self) -> DbResult<Vec<Update>>;
}

#[async_trait]
pub trait ReleaseRepository: Repository<Release> {
    async fn list_active(&self) -> DbResult<Vec<Release>>;

    async fn list_by_update(&self, update_id: Uuid) -> DbResult<Vec<Release>>;
}

#[async_trait]
pub trait DeviceRepository: Repository<Device> {
    async fn get_by_identifier(&self, device_identifier: &str) -> DbResult<Option<Device>>;

    async fn list_by_tenant(&self, tenant_id: &str) -> DbResult<Vec<Device>>;
}

#[async_trait]
pub trait DeploymentRepository: Repository<Deployment> {
    async fn list_by_device(&self, device_id: Uuid) -> DbResult<Vec<Deployment>>;

    async fn list_by_release(&self, release_id: Uuid) -> DbResult<Vec<Deployment>>;

    async fn list_by_status(&self, status: DeploymentStatus) -> DbResult<Vec<Deployment>>;

    /// The pending, downloading or installing deployment of `release_id` to
    /// `device_id`, if any.
    async fn find_active(&self, release_id: Uuid, device_id: Uuid)
    -> DbResult<Option<Deployment>>;

    /// Insert `deployment` unless an active deployment already exists for
    /// the same release and device. The check and insert are atomic.
    async fn create_if_idle(&self, deployment: Deployment) -> DbResult<Option<Deployment>>;

    /// Persist `next` only while the stored row still has the status, retry
    /// count and postpone count seen in `previous`. `Ok(None)` means another
    /// writer changed it first.
    async fn update_if_unchanged(
        &self,
        previous: &Deployment,
        next: Deployment,
    ) -> DbResult<Option<Deployment>>;
}

#[async_trait]
pub trait ClientRepository: Repository<Client> {
    async fn list_active(&self) -> DbResult<Vec<Client>>;

    /// Record the outcome of a webhook delivery.
    async fn record_webhook_result(
        &self,
        id: Uuid,
        success: bool,
        at: DateTime<Utc>,
    ) -> DbResult<()>;
}

/// Handles to every repository, backed by one store.
#[derive(Clone)]
pub struct Repositories {
    pub updates: Arc<dyn UpdateRepository>,
    pub releases: Arc<dyn ReleaseRepository>,
    pub devices: Arc<dyn DeviceRepository>,
    pub deployments: Arc<dyn DeploymentRepository>,
    pub clients: Arc<dyn ClientRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        let db = Arc::new(MemoryDatabase::default());
        Self {
            updates: db.clone(),
            releases: db.clone(),
            devices: db.clone(),
            deployments: db.clone(),
            clients: db,
        }
    }

    /// Postgres when `database_url` is set, otherwise an in-memory store.
    pub async fn connect(database_url: Option<&str>) -> DbResult<Self> {
        match database_url.filter(|url| !url.trim().is_empty()) {
            Some(url) => {
                let db = DatabaseManager::new(url).await?;
                info!("Using Postgres store");
                Ok(Self::postgres(Arc::new(db)))
            }
            None => {
                warn!("No database URL configured, using in-memory store");
                Ok(Self::in_memory())
            }
        }
    }

    pub fn postgres(db: Arc<DatabaseManager>) -> Self {
        Self {
            updates: db.clone(),
            releases: db.clone(),
            devices: db.clone(),
            deployments: db.clone(),
            clients: db,
        }
    }
}
