//! Registry of client portals that receive release webhooks.

use std::sync::Arc;

use artifact_signing::generate_webhook_secret;
use be_remote_db::{Client, ClientRepository, ReleaseRepository, Repositories, Repository};
use chrono::Utc;
use tracing::{info, instrument};
use update_models::ReleaseNotification;
use uuid::Uuid;

use crate::{
    error::{UpdateServiceError, UpdateServiceResult},
    types::{ClientCreated, ClientHealth, CreateClientRequest, UpdateClientRequest, WebhookDelivery},
    utils::validate_webhook_url,
    webhook::{WebhookNotifier, release_notification},
};

#[derive(Clone)]
pub struct ClientService {
    clients: Arc<dyn ClientRepository>,
    releases: Arc<dyn ReleaseRepository>,
    notifier: WebhookNotifier,
}

fn required(value: &str, field: &str) -> UpdateServiceResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(UpdateServiceError::validation(format!(
            "{field} must not be empty"
        )));
    }
    Ok(value.to_string())
}

impl ClientService {
    pub fn new(repos: &Repositories, notifier: WebhookNotifier) -> Self {
        Self {
            clients: repos.clients.clone(),
            releases: repos.releases.clone(),
            notifier,
        }
    }

    /// Register a portal with a freshly generated webhook secret. The secret
    /// is only ever returned from this call.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: CreateClientRequest) -> UpdateServiceResult<ClientCreated> {
        let name = required(&request.name, "name")?;
        let webhook_url = required(&request.webhook_url, "webhook_url")?;
        validate_webhook_url(&webhook_url)?;

        let webhook_secret = generate_webhook_secret();
        let client = self
            .clients
            .create(Client {
                id: Uuid::now_v7(),
                name,
                description: request.description,
                webhook_url,
                webhook_secret: webhook_secret.clone(),
                is_active: true,
                last_webhook_success: None,
                last_webhook_failure: None,
                consecutive_failures: 0,
                contact_email: request.contact_email,
                created_at: Utc::now(),
            })
            .await?;
        info!("Registered client {} ({})", client.id, client.name);

        Ok(ClientCreated {
            client,
            webhook_secret,
        })
    }

    pub async fn list(&self, include_inactive: bool) -> UpdateServiceResult<Vec<Client>> {
        let clients = if include_inactive {
            self.clients.list().await?
        } else {
            self.clients.list_active().await?
        };
        Ok(clients)
    }

    pub async fn get(&self, id: Uuid) -> UpdateServiceResult<Client> {
        self.clients
            .get(id)
            .await?
            .ok_or_else(|| UpdateServiceError::not_found("client", id))
    }

    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateClientRequest,
    ) -> UpdateServiceResult<Client> {
        let mut client = self.get(id).await?;

        if let Some(name) = request.name {
            client.name = required(&name, "name")?;
        }
        if let Some(url) = request.webhook_url {
            let url = required(&url, "webhook_url")?;
            validate_webhook_url(&url)?;
            client.webhook_url = url;
        }
        if let Some(description) = request.description {
            client.description = Some(description);
        }
        if let Some(contact_email) = request.contact_email {
            client.contact_email = Some(contact_email);
        }
        if let Some(is_active) = request.is_active {
            client.is_active = is_active;
        }

        Ok(self.clients.update(client).await?)
    }

    pub async fn delete(&self, id: Uuid) -> UpdateServiceResult<()> {
        if !self.clients.delete(id).await? {
            return Err(UpdateServiceError::not_found("client", id));
        }
        info!("Deleted client {}", id);
        Ok(())
    }

    /// Send a `webhook.test` event to one client.
    pub async fn test_webhook(&self, id: Uuid) -> UpdateServiceResult<WebhookDelivery> {
        let client = self.get(id).await?;
        Ok(self
            .notifier
            .deliver(&client, &ReleaseNotification::test_event())
            .await)
    }

    /// Re-send the notification for `release_id` to one client.
    pub async fn notify_release(
        &self,
        id: Uuid,
        release_id: Uuid,
    ) -> UpdateServiceResult<WebhookDelivery> {
        let client = self.get(id).await?;
        let release = self
            .releases
            .get(release_id)
            .await?
            .ok_or_else(|| UpdateServiceError::not_found("release", release_id))?;
        info!(
            "Manually notifying client {} ({}) of release {}",
            client.id, client.name, release.id
        );
        Ok(self
            .notifier
            .deliver(&client, &release_notification(&release))
            .await)
    }

    pub async fn check_health(&self, id: Uuid) -> UpdateServiceResult<ClientHealth> {
        let client = self.get(id).await?;
        Ok(self.notifier.check_health(&client).await)
    }
}
