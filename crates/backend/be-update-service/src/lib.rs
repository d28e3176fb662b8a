//! Update authority API
//!
//! Publishes signed update packages, manages releases and the client portals
//! that replicate them, and serves the sync feed portals pull from.
//! Release creation pushes an HMAC-signed webhook to every active portal.

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use be_remote_db::Repositories;
use be_storage::ArtifactStore;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

mod analytics;
pub mod catalog;
pub mod clients;
pub mod error;
pub mod handlers;
pub mod releases;
pub mod service;
pub mod types;
pub mod utils;
pub mod webhook;

use service::AppState;

/// Largest accepted update package.
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Create the axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Update catalog
        .route(
            "/api/updates",
            get(handlers::list_updates)
                .post(handlers::upload_update)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/api/updates/{id}",
            get(handlers::get_update)
                .put(handlers::edit_update)
                .delete(handlers::delete_update),
        )
        .route(
            "/api/updates/{id}/download",
            get(handlers::download_update),
        )
        // Releases
        .route(
            "/api/releases",
            get(handlers::list_releases).post(handlers::create_release),
        )
        .route("/api/releases/{id}", get(handlers::get_release))
        .route(
            "/api/releases/{id}/toggle",
            post(handlers::toggle_release).put(handlers::toggle_release),
        )
        // Client portals
        .route(
            "/api/clients",
            get(handlers::list_clients).post(handlers::create_client),
        )
        .route(
            "/api/clients/{id}",
            get(handlers::get_client)
                .put(handlers::update_client)
                .delete(handlers::delete_client),
        )
        .route("/api/clients/{id}/test", post(handlers::test_client_webhook))
        .route("/api/clients/{id}/health", get(handlers::client_health))
        .route(
            "/api/clients/{id}/notify/{release_id}",
            post(handlers::notify_client),
        )
        // Feeds pulled by portals and agents
        .route(
            "/api/sync/releases/active",
            get(handlers::active_release_feed),
        )
        .route(
            "/api/sync/updates/{id}/metadata",
            get(handlers::update_metadata),
        )
        .route("/api/signing/public-key", get(handlers::public_key))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Initialize the update service and return the router
pub fn init_update_service(
    repos: &Repositories,
    store: Arc<ArtifactStore>,
    shutdown: CancellationToken,
) -> Router {
    debug!(
        "Initializing update service with {} artifact storage",
        store.get_backend_name()
    );

    let state = Arc::new(AppState::new(repos, store, shutdown));
    create_router(state)
}

pub use catalog::UpdateCatalog;
pub use clients::ClientService;
pub use error::{ErrorResponse, UpdateServiceError, UpdateServiceResult};
pub use releases::ReleaseService;
pub use webhook::WebhookNotifier;
