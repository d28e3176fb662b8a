//! Device registry.

use std::sync::Arc;

use be_remote_db::{Device, DeviceRepository, Repositories, Repository};
use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    error::{DeploymentError, DeploymentResult},
    types::{DeviceSettingsRequest, HeartbeatRequest, RegisterDeviceRequest},
};

#[derive(Clone)]
pub struct DeviceService {
    devices: Arc<dyn DeviceRepository>,
}

impl DeviceService {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            devices: repos.devices.clone(),
        }
    }

    #[instrument(skip(self, request), fields(device_identifier = %request.device_identifier))]
    pub async fn register(&self, request: RegisterDeviceRequest) -> DeploymentResult<Device> {
        let identifier = request.device_identifier.trim();
        if identifier.is_empty() {
            return Err(DeploymentError::validation("device_identifier is required"));
        }
        if self.devices.get_by_identifier(identifier).await?.is_some() {
            return Err(DeploymentError::DeviceExists(identifier.to_string()));
        }

        let mut device = Device::new(identifier, request.device_name, request.device_type);
        device.tenant_id = request.tenant_id;
        if let Some(version) = request.current_version {
            device.current_version = version;
        }

        let device = self.devices.create(device).await.map_err(|e| {
            if e.is_duplicate() {
                DeploymentError::DeviceExists(identifier.to_string())
            } else {
                e.into()
            }
        })?;
        info!("Registered device {} ({})", device.device_identifier, device.id);
        Ok(device)
    }

    pub async fn get(&self, id: Uuid) -> DeploymentResult<Device> {
        self.devices
            .get(id)
            .await?
            .ok_or_else(|| DeploymentError::not_found("device", id))
    }

    /// Devices ordered by registration, optionally scoped to a tenant.
    pub async fn list(
        &self,
        tenant_id: Option<&str>,
        include_inactive: bool,
    ) -> DeploymentResult<Vec<Device>> {
        let devices = match tenant_id {
            Some(tenant) => self.devices.list_by_tenant(tenant).await?,
            None => self.devices.list().await?,
        };
        Ok(devices
            .into_iter()
            .filter(|d| include_inactive || d.is_active)
            .collect())
    }

    #[instrument(skip(self, settings))]
    pub async fn update_settings(
        &self,
        id: Uuid,
        settings: DeviceSettingsRequest,
    ) -> DeploymentResult<Device> {
        let mut device = self.get(id).await?;

        if let Some(name) = settings.device_name {
            device.device_name = name;
        }
        if let Some(automatic) = settings.automatic_updates {
            device.automatic_updates = automatic;
        }
        if settings.update_schedule.is_some() {
            device.update_schedule = settings.update_schedule;
        }
        if settings.maintenance_window_start.is_some() {
            device.maintenance_window_start = settings.maintenance_window_start;
        }
        if settings.maintenance_window_end.is_some() {
            device.maintenance_window_end = settings.maintenance_window_end;
        }
        if let Some(skip) = settings.skip_non_security_updates {
            device.skip_non_security_updates = skip;
        }
        if let Some(postpone) = settings.postpone_security_updates {
            device.postpone_security_updates = postpone;
        }

        Ok(self.devices.update(device).await?)
    }

    /// Record that the device checked in, along with the version it runs.
    pub async fn heartbeat(&self, id: Uuid, request: HeartbeatRequest) -> DeploymentResult<Device> {
        let mut device = self.get(id).await?;
        let now = Utc::now();
        device.last_seen_at = Some(now);
        device.last_update_check = Some(now);
        if let Some(version) = request.current_version
            && version != device.current_version
        {
            debug!(
                "Device {} reports version {} (was {})",
                device.device_identifier, version, device.current_version
            );
            device.current_version = version;
        }
        Ok(self.devices.update(device).await?)
    }

    /// Mark a device inactive. Its deployments are kept.
    pub async fn deactivate(&self, id: Uuid) -> DeploymentResult<Device> {
        let mut device = self.get(id).await?;
        device.is_active = false;
        Ok(self.devices.update(device).await?)
    }

    /// Remove a device and every deployment that targets it.
    pub async fn delete(&self, id: Uuid) -> DeploymentResult<()> {
        if !self.devices.delete(id).await? {
            return Err(DeploymentError::not_found("device", id));
        }
        info!("Deleted device {}", id);
        Ok(())
    }
}
