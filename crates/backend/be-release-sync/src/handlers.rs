use std::sync::Arc;

use artifact_signing::verify_webhook_body;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use be_remote_db::{ReleaseRepository, Repository};
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};
use update_models::{
    AgentRelease, AgentUpdate, CLIENT_ID_HEADER, RELEASE_CREATED_EVENT, ReleaseNotification,
    SIGNATURE_HEADER, WEBHOOK_TEST_EVENT, WebhookAck,
};

use crate::{
    SyncState,
    error::{SyncError, SyncResult},
};

pub const API_KEY_HEADER: &str = "X-API-Key";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ---------------------------------------------------------------------------
// POST /api/webhooks/release-notification
// ---------------------------------------------------------------------------

/// Accepts a release notification from the authority.
///
/// The signature is checked against the raw body before it is parsed.
#[instrument(skip_all)]
pub async fn receive_release_notification(
    State(state): State<Arc<SyncState>>,
    headers: HeaderMap,
    body: Bytes,
) -> SyncResult<Json<WebhookAck>> {
    let secret = state
        .webhook_secret
        .as_deref()
        .ok_or(SyncError::WebhookSecretMissing)?;

    let client_id = header(&headers, CLIENT_ID_HEADER).unwrap_or("unknown");
    let signature = header(&headers, SIGNATURE_HEADER).unwrap_or_default();

    if !verify_webhook_body(secret, &body, signature) {
        warn!("Invalid webhook signature from client {}", client_id);
        return Err(SyncError::InvalidSignature);
    }

    let notification: ReleaseNotification = serde_json::from_slice(&body)?;
    info!(
        "Received webhook notification {} for release {:?}",
        notification.event_type, notification.release_id
    );

    let message = match notification.event_type.as_str() {
        WEBHOOK_TEST_EVENT => "Webhook test received",
        RELEASE_CREATED_EVENT => {
            state.trigger.trigger(notification.release_id);
            "Webhook notification processed, sync queued"
        }
        other => {
            warn!("Unrecognised webhook event {}, syncing anyway", other);
            state.trigger.trigger(notification.release_id);
            "Webhook notification processed, sync queued"
        }
    };

    Ok(Json(WebhookAck {
        status: "received".to_string(),
        event_type: notification.event_type,
        release_id: notification.release_id,
        timestamp: Utc::now(),
        message: message.to_string(),
    }))
}

// ---------------------------------------------------------------------------
// GET /api/webhooks/ping
// ---------------------------------------------------------------------------

pub async fn ping() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "client-portal",
        "timestamp": Utc::now(),
    }))
}

// ---------------------------------------------------------------------------
// POST /api/sync/trigger, POST /api/sync/run
// ---------------------------------------------------------------------------

pub async fn trigger_sync(State(state): State<Arc<SyncState>>) -> impl IntoResponse {
    state.trigger.trigger(None);
    (
        StatusCode::ACCEPTED,
        Json(json!({ "queued": true, "message": "Sync queued" })),
    )
}

pub async fn run_sync(State(state): State<Arc<SyncState>>) -> Response {
    let report = state.executor.run(&state.cancel).await;
    let status = if report.success {
        StatusCode::OK
    } else if state.cancel.is_cancelled() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(report)).into_response()
}

// ---------------------------------------------------------------------------
// GET /api/releases/active
// ---------------------------------------------------------------------------

/// Cached active releases with the update metadata an agent needs to fetch
/// and verify the artifact, newest first.
pub async fn active_releases(
    State(state): State<Arc<SyncState>>,
    headers: HeaderMap,
) -> SyncResult<Json<Vec<AgentRelease>>> {
    if let Some(expected) = state.device_api_key.as_deref()
        && header(&headers, API_KEY_HEADER) != Some(expected)
    {
        warn!("Rejected release listing with missing or wrong API key");
        return Err(SyncError::Unauthorized);
    }

    let releases = state.repos.releases.list_active().await?;
    let mut out = Vec::with_capacity(releases.len());
    for release in releases {
        let update = state
            .repos
            .updates
            .get(release.update_id)
            .await?
            .map(|u| AgentUpdate {
                version: u.version,
                file_hash: u.file_hash,
                digital_signature: u.digital_signature,
                file_size: u.file_size,
                severity: u.severity.to_string(),
                is_security_update: u.is_security_update,
            });
        out.push(AgentRelease {
            id: release.id,
            update_id: release.update_id,
            release_date: release.release_date,
            is_mandatory: release.is_mandatory,
            max_postpone_days: release.max_postpone_days,
            update,
        });
    }
    Ok(Json(out))
}
