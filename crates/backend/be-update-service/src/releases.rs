use std::sync::Arc;

use be_remote_db::{
    ClientRepository, Release, ReleaseRepository, Repositories, Repository, UpdateRepository,
};
use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    analytics,
    error::{UpdateServiceError, UpdateServiceResult},
    types::CreateReleaseRequest,
    utils::validate_version,
    webhook::WebhookNotifier,
};

#[derive(Clone)]
pub struct ReleaseService {
    releases: Arc<dyn ReleaseRepository>,
    updates: Arc<dyn UpdateRepository>,
    clients: Arc<dyn ClientRepository>,
    notifier: WebhookNotifier,
}

impl ReleaseService {
    pub fn new(repos: &Repositories, notifier: WebhookNotifier) -> Self {
        Self {
            releases: repos.releases.clone(),
            updates: repos.updates.clone(),
            clients: repos.clients.clone(),
            notifier,
        }
    }

    /// Release an existing update. Active clients are notified in the
    /// background; delivery failures never fail the release.
    #[instrument(skip(self, request), fields(update_id = %request.update_id))]
    pub async fn create(&self, request: CreateReleaseRequest) -> UpdateServiceResult<Release> {
        let max_postpone_days = request
            .max_postpone_days
            .unwrap_or(Release::DEFAULT_MAX_POSTPONE_DAYS);
        if max_postpone_days < 0 {
            return Err(UpdateServiceError::validation(
                "max_postpone_days must not be negative",
            ));
        }
        let minimum_version = match request.minimum_version.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Some(validate_version(v)?),
            _ => None,
        };

        let update = self
            .updates
            .get(request.update_id)
            .await?
            .ok_or_else(|| UpdateServiceError::not_found("update", request.update_id))?;

        let now = Utc::now();
        let release = self
            .releases
            .create(Release {
                id: Uuid::now_v7(),
                update_id: update.id,
                release_date: request.release_date.unwrap_or(now),
                is_active: true,
                is_mandatory: request.is_mandatory,
                minimum_version,
                max_postpone_days,
                release_notes: request.release_notes,
                created_at: now,
            })
            .await?;
        info!(
            "Created release {} for update {} (mandatory: {})",
            release.id, update.version, release.is_mandatory
        );

        let active_clients = self.clients.list_active().await.map(|c| c.len()).unwrap_or(0);
        analytics::track_release_created(&update.version, release.is_mandatory, active_clients);

        let notifier = self.notifier.clone();
        let notified = release.clone();
        tokio::spawn(async move {
            notifier.notify_release(&notified).await;
        });

        Ok(release)
    }

    pub async fn list(&self, include_inactive: bool) -> UpdateServiceResult<Vec<Release>> {
        let releases = if include_inactive {
            self.releases.list().await?
        } else {
            self.releases.list_active().await?
        };
        Ok(releases)
    }

    pub async fn get(&self, id: Uuid) -> UpdateServiceResult<Release> {
        self.releases
            .get(id)
            .await?
            .ok_or_else(|| UpdateServiceError::not_found("release", id))
    }

    /// Flip the active flag. Releases are never deleted.
    #[instrument(skip(self))]
    pub async fn toggle_active(&self, id: Uuid) -> UpdateServiceResult<Release> {
        let mut release = self.get(id).await?;
        release.is_active = !release.is_active;
        let release = self.releases.update(release).await?;
        info!("Release {} active: {}", release.id, release.is_active);
        Ok(release)
    }
}
