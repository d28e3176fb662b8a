//! Release cache synchronization for client portals.
//!
//! A portal keeps a local copy of the authority's active releases. The copy
//! is refreshed on a timer and whenever the authority sends a signed release
//! webhook. Device agents read the cached releases from
//! `GET /api/releases/active`.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use be_remote_db::Repositories;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

pub mod config;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod source;
pub mod trigger;

pub use config::SyncConfig;
pub use error::{ErrorResponse, SyncError, SyncResult};
pub use executor::{SyncExecutor, SyncReport};
pub use source::{HttpReleaseSource, ReleaseSource};
pub use trigger::{SyncRequest, SyncTrigger, SyncWorker};

pub struct SyncState {
    pub executor: Arc<SyncExecutor>,
    pub trigger: SyncTrigger,
    pub repos: Repositories,
    pub webhook_secret: Option<String>,
    pub device_api_key: Option<String>,
    /// Server shutdown; stops `/api/sync/run` passes between records.
    pub cancel: CancellationToken,
}

pub fn create_router(state: Arc<SyncState>) -> Router {
    Router::new()
        .route(
            "/api/webhooks/release-notification",
            post(handlers::receive_release_notification),
        )
        .route("/api/webhooks/ping", get(handlers::ping))
        .route("/api/sync/trigger", post(handlers::trigger_sync))
        .route("/api/sync/run", post(handlers::run_sync))
        .route("/api/releases/active", get(handlers::active_releases))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Build the sync state, spawn the background worker and return the router.
pub fn init_release_sync(
    config: SyncConfig,
    repos: Repositories,
    cancel: CancellationToken,
) -> SyncResult<Router> {
    let source: Option<Arc<dyn ReleaseSource>> = match &config.authority_api_url {
        Some(url) => {
            info!("Syncing releases from {}", url);
            Some(Arc::new(HttpReleaseSource::new(url.clone())?))
        }
        None => {
            warn!("AUTHORITY_API_URL not set, release sync disabled");
            None
        }
    };
    if config.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET not set, release webhooks will be refused");
    }

    let executor = Arc::new(SyncExecutor::new(source, &repos));
    let trigger = SyncTrigger::new();

    let worker = SyncWorker::new(
        executor.clone(),
        trigger.clone(),
        config.interval,
        config.initial_delay,
    );
    tokio::spawn(worker.run(cancel.clone()));

    let state = Arc::new(SyncState {
        executor,
        trigger,
        repos,
        webhook_secret: config.webhook_secret,
        device_api_key: config.device_api_key,
        cancel,
    });
    Ok(create_router(state))
}
