//! Wire payloads exchanged between the update authority, client portals and
//! device agents. All payloads use camelCase JSON field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the base64 HMAC-SHA256 of the raw webhook body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const CLIENT_ID_HEADER: &str = "X-Webhook-Client-Id";

pub const RELEASE_CREATED_EVENT: &str = "release.created";
pub const WEBHOOK_TEST_EVENT: &str = "webhook.test";

pub const SYNC_HINT_MESSAGE: &str =
    "New release available - please sync from /api/sync/releases/active";

/// One active release with the metadata of the update it ships.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSyncRecord {
    pub release_id: Uuid,
    pub update_id: Uuid,
    pub version: String,
    pub release_date: DateTime<Utc>,
    pub is_mandatory: bool,
    pub max_postpone_days: i32,
    pub severity: String,
    pub changelog: Option<String>,
    /// Comma-joined CVE identifiers, see [`join_cve_list`].
    pub cve_list: Option<String>,
    pub file_hash: String,
    pub signature: String,
    pub file_name: String,
    pub file_size_bytes: i64,
}

/// Artifact metadata for one update, served by the authority's metadata feed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMetadata {
    pub id: Uuid,
    pub version: String,
    pub file_name: String,
    pub file_hash: String,
    pub signature: String,
    pub file_size_bytes: i64,
    pub changelog: Option<String>,
    pub cve_list: Option<String>,
}

/// Body POSTed to client portals when something changes on the authority.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseNotification {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub release_id: Option<Uuid>,
    pub update_id: Option<Uuid>,
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_mandatory: bool,
    #[serde(default)]
    pub max_postpone_days: i32,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub message: String,
}

impl ReleaseNotification {
    pub fn test_event() -> Self {
        Self {
            event_type: WEBHOOK_TEST_EVENT.to_string(),
            timestamp: Utc::now(),
            release_id: None,
            update_id: None,
            release_date: None,
            is_mandatory: false,
            max_postpone_days: 0,
            is_active: true,
            message: "Webhook connectivity test".to_string(),
        }
    }
}

/// Reply to an accepted webhook.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub status: String,
    pub event_type: String,
    pub release_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Update metadata a device agent needs to fetch and verify an artifact.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentUpdate {
    pub version: String,
    pub file_hash: String,
    pub digital_signature: String,
    pub file_size: i64,
    pub severity: String,
    pub is_security_update: bool,
}

/// A release as served to device agents by a client portal.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentRelease {
    pub id: Uuid,
    pub update_id: Uuid,
    pub release_date: DateTime<Utc>,
    pub is_mandatory: bool,
    pub max_postpone_days: i32,
    pub update: Option<AgentUpdate>,
}

pub fn join_cve_list(cves: &[String]) -> String {
    cves.join(", ")
}

/// Split a comma-joined CVE list, trimming entries and dropping empties.
pub fn split_cve_list(cves: &str) -> Vec<String> {
    cves.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
