use std::sync::Arc;

use be_remote_db::Repositories;
use be_storage::ArtifactStore;
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::UpdateCatalog, clients::ClientService, releases::ReleaseService,
    webhook::WebhookNotifier,
};

/// Shared state of the authority API.
pub struct AppState {
    pub catalog: UpdateCatalog,
    pub releases: ReleaseService,
    pub clients: ClientService,
    /// Cancelled on shutdown; in-flight uploads are purged.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        repos: &Repositories,
        store: Arc<ArtifactStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let notifier = WebhookNotifier::new(repos.clients.clone());
        Self {
            catalog: UpdateCatalog::new(repos, store),
            releases: ReleaseService::new(repos, notifier.clone()),
            clients: ClientService::new(repos, notifier),
            shutdown,
        }
    }
}
