use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDeviceRequest {
    pub device_identifier: String,
    pub device_name: String,
    pub device_type: String,
    pub tenant_id: Option<String>,
    pub current_version: Option<String>,
}

/// Partial update of a device's update preferences. Absent fields are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceSettingsRequest {
    pub device_name: Option<String>,
    pub automatic_updates: Option<bool>,
    pub update_schedule: Option<String>,
    pub maintenance_window_start: Option<String>,
    pub maintenance_window_end: Option<String>,
    pub skip_non_security_updates: Option<bool>,
    pub postpone_security_updates: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartbeatRequest {
    pub current_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListDevicesQuery {
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub release_id: Uuid,
    pub device_ids: Vec<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostponeRequest {
    pub postpone_until: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatisticsQuery {
    pub release_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub release_id: Uuid,
    pub created: usize,
    pub deployment_ids: Vec<Uuid>,
    pub skipped: Vec<crate::service::SkippedDevice>,
}
