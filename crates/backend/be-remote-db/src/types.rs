use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Persisted records addressable by id.
pub trait Entity: Clone + Send + Sync + 'static {
    const NAME: &'static str;

    fn id(&self) -> Uuid;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "update_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Security,
    BugFix,
    Feature,
    Performance,
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateType::Security => write!(f, "security"),
            UpdateType::BugFix => write!(f, "bugfix"),
            UpdateType::Feature => write!(f, "feature"),
            UpdateType::Performance => write!(f, "performance"),
        }
    }
}

impl std::str::FromStr for UpdateType {
    type Err = String;

    /// Case-insensitive. `bug_fix` and `bug-fix` are accepted for `bugfix`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "security" => Ok(UpdateType::Security),
            "bugfix" => Ok(UpdateType::BugFix),
            "feature" => Ok(UpdateType::Feature),
            "performance" => Ok(UpdateType::Performance),
            _ => Err(format!("unknown update type '{}'", s.trim())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "update_severity", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UpdateSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for UpdateSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateSeverity::Critical => write!(f, "critical"),
            UpdateSeverity::High => write!(f, "high"),
            UpdateSeverity::Medium => write!(f, "medium"),
            UpdateSeverity::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for UpdateSeverity {
    type Err = String;

    /// Case-insensitive, so wire values like "Critical" parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(UpdateSeverity::Critical),
            "high" => Ok(UpdateSeverity::High),
            "medium" => Ok(UpdateSeverity::Medium),
            "low" => Ok(UpdateSeverity::Low),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "deployment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Downloading,
    Installing,
    Completed,
    Failed,
    Postponed,
    Cancelled,
}

impl DeploymentStatus {
    pub const ALL: [DeploymentStatus; 7] = [
        DeploymentStatus::Pending,
        DeploymentStatus::Downloading,
        DeploymentStatus::Installing,
        DeploymentStatus::Completed,
        DeploymentStatus::Failed,
        DeploymentStatus::Postponed,
        DeploymentStatus::Cancelled,
    ];

    /// A deployment in one of these states blocks scheduling the same
    /// release to the same device again.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            DeploymentStatus::Pending | DeploymentStatus::Downloading | DeploymentStatus::Installing
        )
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentStatus::Pending => write!(f, "pending"),
            DeploymentStatus::Downloading => write!(f, "downloading"),
            DeploymentStatus::Installing => write!(f, "installing"),
            DeploymentStatus::Completed => write!(f, "completed"),
            DeploymentStatus::Failed => write!(f, "failed"),
            DeploymentStatus::Postponed => write!(f, "postponed"),
            DeploymentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A published, signed update package.
///
/// `file_path`, `file_hash`, `digital_signature` and `file_size` are fixed
/// once the record exists; repository updates only touch metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Update {
    pub id: Uuid,
    pub version: String,
    pub title: String,
    pub description: Option<String>,
    pub changelog: Option<String>,
    pub security_fixes: Vec<String>,
    pub file_path: String,
    pub file_hash: String,
    pub digital_signature: String,
    pub file_size: i64,
    pub update_type: UpdateType,
    pub severity: UpdateSeverity,
    pub is_security_update: bool,
    pub target_device_types: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Update {
    const NAME: &'static str = "update";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Release {
    pub id: Uuid,
    pub update_id: Uuid,
    pub release_date: DateTime<Utc>,
    pub is_active: bool,
    pub is_mandatory: bool,
    pub minimum_version: Option<String>,
    pub max_postpone_days: i32,
    pub release_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Release {
    pub const DEFAULT_MAX_POSTPONE_DAYS: i32 = 7;
}

impl Entity for Release {
    const NAME: &'static str = "release";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: Uuid,
    pub device_identifier: String,
    pub device_name: String,
    pub device_type: String,
    pub tenant_id: Option<String>,
    pub current_version: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_update_check: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub automatic_updates: bool,
    pub update_schedule: Option<String>,
    pub maintenance_window_start: Option<String>,
    pub maintenance_window_end: Option<String>,
    pub skip_non_security_updates: bool,
    pub postpone_security_updates: bool,
}

impl Device {
    pub const INITIAL_VERSION: &'static str = "0.0.0";

    pub fn new(
        device_identifier: impl Into<String>,
        device_name: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            device_identifier: device_identifier.into(),
            device_name: device_name.into(),
            device_type: device_type.into(),
            tenant_id: None,
            current_version: Self::INITIAL_VERSION.to_string(),
            registered_at: Utc::now(),
            last_seen_at: None,
            last_update_check: None,
            is_active: true,
            automatic_updates: true,
            update_schedule: None,
            maintenance_window_start: None,
            maintenance_window_end: None,
            skip_non_security_updates: false,
            postpone_security_updates: false,
        }
    }
}

impl Entity for Device {
    const NAME: &'static str = "device";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Deployment {
    pub id: Uuid,
    pub release_id: Uuid,
    pub device_id: Uuid,
    pub status: DeploymentStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub postpone_reason: Option<String>,
    pub postpone_count: i32,
    pub last_postponed_at: Option<DateTime<Utc>>,
    pub download_progress: Option<i32>,
    pub install_progress: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(release_id: Uuid, device_id: Uuid, scheduled_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::now_v7(),
            release_id,
            device_id,
            status: DeploymentStatus::Pending,
            scheduled_at,
            started_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
            last_retry_at: None,
            postpone_reason: None,
            postpone_count: 0,
            last_postponed_at: None,
            download_progress: None,
            install_progress: None,
            created_at: Utc::now(),
        }
    }
}

impl Entity for Deployment {
    const NAME: &'static str = "deployment";

    fn id(&self) -> Uuid {
        self.id
    }
}

/// A downstream portal that receives release notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub webhook_url: String,
    #[serde(skip_serializing)]
    pub webhook_secret: String,
    pub is_active: bool,
    pub last_webhook_success: Option<DateTime<Utc>>,
    pub last_webhook_failure: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub contact_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Client {
    const NAME: &'static str = "client";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_type_parse() {
        assert_eq!("Feature".parse(), Ok(UpdateType::Feature));
        assert_eq!("bug_fix".parse(), Ok(UpdateType::BugFix));
        assert_eq!("BugFix".parse(), Ok(UpdateType::BugFix));
        assert!("hotfix".parse::<UpdateType>().is_err());
    }

    #[test]
    fn test_severity_parse_ignores_case() {
        assert_eq!("Critical".parse(), Ok(UpdateSeverity::Critical));
        assert_eq!(" high ".parse(), Ok(UpdateSeverity::High));
        assert_eq!("LOW".parse(), Ok(UpdateSeverity::Low));
        assert!("urgent".parse::<UpdateSeverity>().is_err());
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&UpdateType::BugFix).unwrap(),
            "\"bugfix\""
        );
        assert_eq!(UpdateType::BugFix.to_string(), "bugfix");
        assert_eq!(
            serde_json::to_string(&DeploymentStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn test_active_statuses() {
        let active: Vec<_> = DeploymentStatus::ALL
            .into_iter()
            .filter(|s| s.is_active())
            .collect();
        assert_eq!(
            active,
            vec![
                DeploymentStatus::Pending,
                DeploymentStatus::Downloading,
                DeploymentStatus::Installing
            ]
        );
    }

    #[test]
    fn test_new_device_defaults() {
        let device = Device::new("dev-1", "Gateway", "gateway");
        assert_eq!(device.current_version, "0.0.0");
        assert!(device.automatic_updates);
        assert!(device.is_active);
    }

    #[test]
    fn test_client_secret_not_serialized() {
        let client = Client {
            id: Uuid::now_v7(),
            name: "portal".into(),
            description: None,
            webhook_url: "http://portal/api/webhooks/release-notification".into(),
            webhook_secret: "s3cret".into(),
            is_active: true,
            last_webhook_success: None,
            last_webhook_failure: None,
            consecutive_failures: 0,
            contact_email: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&client).unwrap();
        assert!(!json.contains("s3cret"));
    }
}
