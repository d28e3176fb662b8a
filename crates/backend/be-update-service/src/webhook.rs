//! Outbound release notifications to client portals.
//!
//! Each body is serialized once and the HMAC covers exactly the bytes that
//! are sent. Every delivery, successful or not, is recorded on the client.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use artifact_signing::sign_webhook_body;
use be_remote_db::{Client, ClientRepository, Release};
use chrono::Utc;
use futures::future::join_all;
use reqwest::header::CONTENT_TYPE;
use tracing::{error, info, instrument, warn};
use update_models::{
    CLIENT_ID_HEADER, RELEASE_CREATED_EVENT, ReleaseNotification, SIGNATURE_HEADER,
    SYNC_HINT_MESSAGE,
};

use crate::{
    types::{ClientHealth, WebhookDelivery},
    utils::ping_url,
};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

pub fn release_notification(release: &Release) -> ReleaseNotification {
    ReleaseNotification {
        event_type: RELEASE_CREATED_EVENT.to_string(),
        timestamp: Utc::now(),
        release_id: Some(release.id),
        update_id: Some(release.update_id),
        release_date: Some(release.release_date),
        is_mandatory: release.is_mandatory,
        max_postpone_days: release.max_postpone_days,
        is_active: release.is_active,
        message: SYNC_HINT_MESSAGE.to_string(),
    }
}

#[derive(Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    clients: Arc<dyn ClientRepository>,
}

impl WebhookNotifier {
    pub fn new(clients: Arc<dyn ClientRepository>) -> Self {
        Self::with_client(reqwest::Client::new(), clients)
    }

    pub fn with_client(http: reqwest::Client, clients: Arc<dyn ClientRepository>) -> Self {
        Self { http, clients }
    }

    /// Notify every active client of `release`, concurrently.
    #[instrument(skip(self, release), fields(release_id = %release.id))]
    pub async fn notify_release(&self, release: &Release) -> Vec<WebhookDelivery> {
        let clients = match self.clients.list_active().await {
            Ok(clients) => clients,
            Err(e) => {
                error!("Could not load clients to notify: {}", e);
                return Vec::new();
            }
        };
        info!(
            "Notifying {} clients of new release {}",
            clients.len(),
            release.id
        );

        let notification = release_notification(release);
        join_all(
            clients
                .iter()
                .map(|client| self.deliver(client, &notification)),
        )
        .await
    }

    /// Send `notification` to one client and record the outcome.
    pub async fn deliver(
        &self,
        client: &Client,
        notification: &ReleaseNotification,
    ) -> WebhookDelivery {
        let outcome = self.send(client, notification).await;

        if outcome.success {
            info!(
                "Webhook delivered to client {} ({})",
                client.id, client.name
            );
        } else {
            warn!(
                "Webhook delivery to client {} ({}) failed: {}",
                client.id,
                client.name,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }

        if let Err(e) = self
            .clients
            .record_webhook_result(client.id, outcome.success, Utc::now())
            .await
        {
            error!(
                "Failed to record webhook result for client {}: {}",
                client.id, e
            );
        }
        outcome
    }

    async fn send(&self, client: &Client, notification: &ReleaseNotification) -> WebhookDelivery {
        let failed = |status_code: Option<u16>, error: String| WebhookDelivery {
            client_id: client.id,
            success: false,
            status_code,
            error: Some(error),
        };

        let body = match serde_json::to_vec(notification) {
            Ok(body) => body,
            Err(e) => return failed(None, format!("serialization failed: {e}")),
        };
        let signature = match sign_webhook_body(&client.webhook_secret, &body) {
            Ok(signature) => signature,
            Err(e) => return failed(None, e.to_string()),
        };

        let response = self
            .http
            .post(&client.webhook_url)
            .timeout(DELIVERY_TIMEOUT)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(CLIENT_ID_HEADER, client.id.to_string())
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => WebhookDelivery {
                client_id: client.id,
                success: true,
                status_code: Some(response.status().as_u16()),
                error: None,
            },
            Ok(response) => failed(
                Some(response.status().as_u16()),
                format!("client answered {}", response.status()),
            ),
            Err(e) => failed(None, e.to_string()),
        }
    }

    /// Probe the `ping` endpoint next to the client's webhook URL.
    #[instrument(skip(self, client), fields(client_id = %client.id))]
    pub async fn check_health(&self, client: &Client) -> ClientHealth {
        let started = Instant::now();
        let result = match ping_url(&client.webhook_url) {
            Ok(url) => self
                .http
                .get(url)
                .timeout(HEALTH_TIMEOUT)
                .send()
                .await
                .map_err(|e| e.to_string())
                .and_then(|response| {
                    if response.status().is_success() {
                        Ok(())
                    } else {
                        Err(format!("ping answered {}", response.status()))
                    }
                }),
            Err(e) => Err(e.to_string()),
        };
        let elapsed = started.elapsed().as_millis() as u64;

        let (is_healthy, error) = match result {
            Ok(()) => (true, None),
            Err(e) => {
                warn!("Health check for client {} failed: {}", client.id, e);
                (false, Some(e))
            }
        };
        let now = Utc::now();
        if let Err(e) = self
            .clients
            .record_webhook_result(client.id, is_healthy, now)
            .await
        {
            error!(
                "Failed to record health result for client {}: {}",
                client.id, e
            );
        }

        ClientHealth {
            client_id: client.id,
            client_name: client.name.clone(),
            is_healthy,
            response_time_ms: is_healthy.then_some(elapsed),
            last_checked: now,
            error,
        }
    }
}
