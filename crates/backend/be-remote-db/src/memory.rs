//! In-process store used for local mode and tests.
//!
//! All tables sit behind one lock, so every repository call (including the
//! check-then-insert in `create_if_idle`) is atomic.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{
    error::{DbError, DbResult},
    repository::{
        ClientRepository, DeploymentRepository, DeviceRepository, ReleaseRepository, Repository,
        UpdateRepository,
    },
    types::{Client, Deployment, DeploymentStatus, Device, Entity, Release, Update},
};

#[derive(Debug, Default)]
pub struct Tables {
    updates: BTreeMap<Uuid, Update>,
    releases: BTreeMap<Uuid, Release>,
    devices: BTreeMap<Uuid, Device>,
    deployments: BTreeMap<Uuid, Deployment>,
    clients: BTreeMap<Uuid, Client>,
}

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
}

/// Per-table hooks mirroring the constraints of the SQL schema.
pub trait Stored: Entity {
    fn table(tables: &Tables) -> &BTreeMap<Uuid, Self>;

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<Uuid, Self>;

    fn check_constraints(&self, _tables: &Tables) -> DbResult<()> {
        Ok(())
    }

    /// Combine a stored record with an incoming change.
    fn merge(_existing: &Self, incoming: Self) -> Self {
        incoming
    }

    fn on_delete(_id: Uuid, _tables: &mut Tables) -> DbResult<()> {
        Ok(())
    }
}

impl Stored for Update {
    fn table(tables: &Tables) -> &BTreeMap<Uuid, Self> {
        &tables.updates
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<Uuid, Self> {
        &mut tables.updates
    }

    fn check_constraints(&self, tables: &Tables) -> DbResult<()> {
        let taken = tables
            .updates
            .values()
            .any(|u| u.id != self.id && u.version == self.version);
        if taken {
            return Err(DbError::duplicate("version", self.version.clone()));
        }
        Ok(())
    }

    fn merge(existing: &Self, incoming: Self) -> Self {
        Self {
            file_path: existing.file_path.clone(),
            file_hash: existing.file_hash.clone(),
            digital_signature: existing.digital_signature.clone(),
            file_size: existing.file_size,
            created_at: existing.created_at,
            ..incoming
        }
    }

    fn on_delete(id: Uuid, tables: &mut Tables) -> DbResult<()> {
        if tables.releases.values().any(|r| r.update_id == id) {
            return Err(DbError::foreign_key("release"));
        }
        Ok(())
    }
}

impl Stored for Release {
    fn table(tables: &Tables) -> &BTreeMap<Uuid, Self> {
        &tables.releases
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<Uuid, Self> {
        &mut tables.releases
    }

    fn check_constraints(&self, tables: &Tables) -> DbResult<()> {
        if !tables.updates.contains_key(&self.update_id) {
            return Err(DbError::foreign_key("update"));
        }
        Ok(())
    }

    fn merge(existing: &Self, incoming: Self) -> Self {
        Self {
            update_id: existing.update_id,
            created_at: existing.created_at,
            ..incoming
        }
    }

    fn on_delete(id: Uuid, tables: &mut Tables) -> DbResult<()> {
        tables.deployments.retain(|_, d| d.release_id != id);
        Ok(())
    }
}

impl Stored for Device {
    fn table(tables: &Tables) -> &BTreeMap<Uuid, Self> {
        &tables.devices
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<Uuid, Self> {
        &mut tables.devices
    }

    fn check_constraints(&self, tables: &Tables) -> DbResult<()> {
        let taken = tables
            .devices
            .values()
            .any(|d| d.id != self.id && d.device_identifier == self.device_identifier);
        if taken {
            return Err(DbError::duplicate(
                "device_identifier",
                self.device_identifier.clone(),
            ));
        }
        Ok(())
    }

    fn merge(existing: &Self, incoming: Self) -> Self {
        Self {
            registered_at: existing.registered_at,
            ..incoming
        }
    }

    fn on_delete(id: Uuid, tables: &mut Tables) -> DbResult<()> {
        tables.deployments.retain(|_, d| d.device_id != id);
        Ok(())
    }
}

impl Stored for Deployment {
    fn table(tables: &Tables) -> &BTreeMap<Uuid, Self> {
        &tables.deployments
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<Uuid, Self> {
        &mut tables.deployments
    }

    fn check_constraints(&self, tables: &Tables) -> DbResult<()> {
        if !tables.releases.contains_key(&self.release_id) {
            return Err(DbError::foreign_key("release"));
        }
        if !tables.devices.contains_key(&self.device_id) {
            return Err(DbError::foreign_key("device"));
        }
        if self.status.is_active() && active_conflict(tables, self).is_some() {
            return Err(DbError::duplicate(
                "active deployment",
                format!("release {} device {}", self.release_id, self.device_id),
            ));
        }
        Ok(())
    }

    fn merge(existing: &Self, incoming: Self) -> Self {
        Self {
            release_id: existing.release_id,
            device_id: existing.device_id,
            created_at: existing.created_at,
            ..incoming
        }
    }
}

impl Stored for Client {
    fn table(tables: &Tables) -> &BTreeMap<Uuid, Self> {
        &tables.clients
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<Uuid, Self> {
        &mut tables.clients
    }

    fn merge(existing: &Self, incoming: Self) -> Self {
        Self {
            created_at: existing.created_at,
            ..incoming
        }
    }
}

fn active_conflict<'a>(tables: &'a Tables, deployment: &Deployment) -> Option<&'a Deployment> {
    tables.deployments.values().find(|d| {
        d.id != deployment.id
            && d.release_id == deployment.release_id
            && d.device_id == deployment.device_id
            && d.status.is_active()
    })
}

fn same_revision(stored: &Deployment, seen: &Deployment) -> bool {
    stored.status == seen.status
        && stored.retry_count == seen.retry_count
        && stored.postpone_count == seen.postpone_count
}

impl MemoryDatabase {
    fn select<T, F>(&self, filter: F) -> Vec<T>
    where
        T: Stored,
        F: Fn(&T) -> bool,
    {
        let tables = self.tables.read();
        T::table(&tables)
            .values()
            .filter(|e| filter(e))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl<T: Stored> Repository<T> for MemoryDatabase {
    async fn get(&self, id: Uuid) -> DbResult<Option<T>> {
        Ok(T::table(&self.tables.read()).get(&id).cloned())
    }

    async fn list(&self) -> DbResult<Vec<T>> {
        Ok(self.select(|_: &T| true))
    }

    async fn create(&self, entity: T) -> DbResult<T> {
        let mut tables = self.tables.write();
        if T::table(&tables).contains_key(&entity.id()) {
            return Err(DbError::duplicate("id", entity.id().to_string()));
        }
        entity.check_constraints(&tables)?;
        T::table_mut(&mut tables).insert(entity.id(), entity.clone());
        Ok(entity)
    }

    async fn update(&self, entity: T) -> DbResult<T> {
        let mut tables = self.tables.write();
        let Some(existing) = T::table(&tables).get(&entity.id()) else {
            return Err(DbError::not_found_with_id(T::NAME, entity.id().to_string()));
        };
        let merged = T::merge(existing, entity);
        merged.check_constraints(&tables)?;
        T::table_mut(&mut tables).insert(merged.id(), merged.clone());
        Ok(merged)
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        let mut tables = self.tables.write();
        if !T::table(&tables).contains_key(&id) {
            return Ok(false);
        }
        T::on_delete(id, &mut tables)?;
        T::table_mut(&mut tables).remove(&id);
        Ok(true)
    }
}

#[async_trait]
impl UpdateRepository for MemoryDatabase {
    async fn get_by_version(&self, version: &str) -> DbResult<Option<Update>> {
        Ok(self
            .select(|u: &Update| u.version == version)
            .into_iter()
            .next())
    }

    async fn list_active(&self) -> DbResult<Vec<Update>> {
        Ok(self.select(|u: &Update| u.is_active))
    }
}

#[async_trait]
impl ReleaseRepository for MemoryDatabase {
    async fn list_active(&self) -> DbResult<Vec<Release>> {
        let mut releases = self.select(|r: &Release| r.is_active);
        releases.sort_by(|a, b| b.release_date.cmp(&a.release_date));
        Ok(releases)
    }

    async fn list_by_update(&self, update_id: Uuid) -> DbResult<Vec<Release>> {
        Ok(self.select(|r: &Release| r.update_id == update_id))
    }
}

#[async_trait]
impl DeviceRepository for MemoryDatabase {
    async fn get_by_identifier(&self, device_identifier: &str) -> DbResult<Option<Device>> {
        Ok(self
            .select(|d: &Device| d.device_identifier == device_identifier)
            .into_iter()
            .next())
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> DbResult<Vec<Device>> {
        Ok(self.select(|d: &Device| d.tenant_id.as_deref() == Some(tenant_id)))
    }
}

#[async_trait]
impl DeploymentRepository for MemoryDatabase {
    async fn list_by_device(&self, device_id: Uuid) -> DbResult<Vec<Deployment>> {
        Ok(self.select(|d: &Deployment| d.device_id == device_id))
    }

    async fn list_by_release(&self, release_id: Uuid) -> DbResult<Vec<Deployment>> {
        Ok(self.select(|d: &Deployment| d.release_id == release_id))
    }

    async fn list_by_status(&self, status: DeploymentStatus) -> DbResult<Vec<Deployment>> {
        Ok(self.select(|d: &Deployment| d.status == status))
    }

    async fn find_active(
        &self,
        release_id: Uuid,
        device_id: Uuid,
    ) -> DbResult<Option<Deployment>> {
        Ok(self
            .select(|d: &Deployment| {
                d.release_id == release_id && d.device_id == device_id && d.status.is_active()
            })
            .into_iter()
            .next())
    }

    async fn create_if_idle(&self, deployment: Deployment) -> DbResult<Option<Deployment>> {
        let mut tables = self.tables.write();
        if active_conflict(&tables, &deployment).is_some() {
            return Ok(None);
        }
        deployment.check_constraints(&tables)?;
        tables
            .deployments
            .insert(deployment.id, deployment.clone());
        Ok(Some(deployment))
    }

    async fn update_if_unchanged(
        &self,
        previous: &Deployment,
        next: Deployment,
    ) -> DbResult<Option<Deployment>> {
        let mut tables = self.tables.write();
        let Some(existing) = tables.deployments.get(&next.id) else {
            return Err(DbError::not_found_with_id(
                Deployment::NAME,
                next.id.to_string(),
            ));
        };
        if !same_revision(existing, previous) {
            return Ok(None);
        }
        let merged = Deployment::merge(existing, next);
        merged.check_constraints(&tables)?;
        tables.deployments.insert(merged.id, merged.clone());
        Ok(Some(merged))
    }
}

#[async_trait]
impl ClientRepository for MemoryDatabase {
    async fn list_active(&self) -> DbResult<Vec<Client>> {
        Ok(self.select(|c: &Client| c.is_active))
    }

    async fn record_webhook_result(
        &self,
        id: Uuid,
        success: bool,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut tables = self.tables.write();
        let client = tables
            .clients
            .get_mut(&id)
            .ok_or_else(|| DbError::not_found_with_id("client", id.to_string()))?;

        if success {
            client.last_webhook_success = Some(at);
            client.consecutive_failures = 0;
        } else {
            client.last_webhook_failure = Some(at);
            client.consecutive_failures += 1;
        }
        Ok(())
    }
}
