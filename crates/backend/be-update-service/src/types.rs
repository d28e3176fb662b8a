use be_remote_db::{Client, UpdateSeverity, UpdateType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use update_models::split_cve_list;
use uuid::Uuid;

use crate::error::{UpdateServiceError, UpdateServiceResult};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

/// Metadata fields collected from a multipart upload.
#[derive(Debug, Clone, Default)]
pub struct UpdateDraft {
    pub version: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub changelog: Option<String>,
    pub update_type: Option<UpdateType>,
    pub severity: Option<UpdateSeverity>,
    pub is_security_update: Option<bool>,
    pub security_fixes: Vec<String>,
    pub target_device_types: Vec<String>,
}

impl UpdateDraft {
    /// Apply one text field. Names are matched ignoring case and
    /// underscores, so `security_fixes` and `SecurityFixes` are the same.
    /// Unknown fields are ignored.
    pub fn set_field(&mut self, name: &str, value: String) -> UpdateServiceResult<()> {
        let key: String = name
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        let value = value.trim().to_string();

        match key.as_str() {
            "version" => self.version = non_empty(value),
            "title" => self.title = non_empty(value),
            "description" => self.description = non_empty(value),
            "changelog" => self.changelog = non_empty(value),
            "updatetype" if !value.is_empty() => {
                self.update_type = Some(value.parse().map_err(UpdateServiceError::Validation)?)
            }
            "severity" if !value.is_empty() => {
                self.severity = Some(value.parse().map_err(UpdateServiceError::Validation)?)
            }
            "issecurityupdate" if !value.is_empty() => {
                self.is_security_update = Some(parse_bool(&value)?)
            }
            "securityfixes" => self.security_fixes = parse_list(&value)?,
            "targetdevicetypes" => self.target_device_types = parse_list(&value)?,
            _ => {}
        }
        Ok(())
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn parse_bool(value: &str) -> UpdateServiceResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(UpdateServiceError::validation(format!(
            "expected a boolean, got '{other}'"
        ))),
    }
}

/// A JSON array of strings, or a comma separated list.
fn parse_list(value: &str) -> UpdateServiceResult<Vec<String>> {
    if value.starts_with('[') {
        let items: Vec<String> = serde_json::from_str(value)
            .map_err(|e| UpdateServiceError::validation(format!("invalid list: {e}")))?;
        Ok(items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    } else {
        Ok(split_cve_list(value))
    }
}

/// Metadata-only edit of an update. Artifact fields cannot be changed.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateMetadataPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub changelog: Option<String>,
    pub security_fixes: Option<Vec<String>>,
    pub update_type: Option<UpdateType>,
    pub severity: Option<UpdateSeverity>,
    pub is_security_update: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateReleaseRequest {
    pub update_id: Uuid,
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_mandatory: bool,
    pub minimum_version: Option<String>,
    pub max_postpone_days: Option<i32>,
    pub release_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
    pub description: Option<String>,
    pub webhook_url: String,
    pub contact_email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateClientRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub webhook_url: Option<String>,
    pub is_active: Option<bool>,
    pub contact_email: Option<String>,
}

/// Returned once, on creation. The secret is never served again.
#[derive(Debug, Serialize)]
pub struct ClientCreated {
    #[serde(flatten)]
    pub client: Client,
    pub webhook_secret: String,
}

/// Outcome of one webhook delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    pub client_id: Uuid,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientHealth {
    pub client_id: Uuid,
    pub client_name: String,
    pub is_healthy: bool,
    pub response_time_ms: Option<u64>,
    pub last_checked: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub algorithm: String,
    pub public_key: String,
}
