use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use be_deployment_service::AppState as DeploymentState;
use be_release_sync::{SyncConfig, init_release_sync};
use be_remote_db::Repositories;
use tokio_util::sync::CancellationToken;

/// Configuration for running a client portal.
pub struct PortalConfig {
    /// Postgres URL. `None` keeps the release cache in memory.
    pub database_url: Option<String>,
    pub http_addr: SocketAddr,
    pub sync: SyncConfig,
    /// When this receiver gets a value, the portal shuts down gracefully.
    pub shutdown: tokio::sync::watch::Receiver<()>,
}

impl PortalConfig {
    pub fn from_env(shutdown: tokio::sync::watch::Receiver<()>) -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("REMOTE_DATABASE_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            http_addr: std::env::var("HTTP_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3001".to_string())
                .parse::<SocketAddr>()
                .context("Invalid HTTP_ADDR format")?,
            sync: SyncConfig::from_env().context("Failed to load sync config")?,
            shutdown,
        })
    }
}

pub async fn run_portal(config: PortalConfig) -> Result<()> {
    let repos = Repositories::connect(config.database_url.as_deref())
        .await
        .context("Failed to open the database")?;

    let worker_cancel = CancellationToken::new();
    let deployment_router =
        be_deployment_service::create_router(Arc::new(DeploymentState::new(&repos)));
    let sync_router = init_release_sync(config.sync, repos, worker_cancel.clone())
        .context("Failed to start release sync")?;

    let health_route = axum::Router::new().route(
        "/health",
        axum::routing::get(|| async { axum::http::StatusCode::OK }),
    );

    let http_router = sync_router.merge(deployment_router).merge(health_route);

    tracing::info!("Starting client portal at {}", config.http_addr);

    let mut http_shutdown = config.shutdown.clone();
    let http_listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http_addr))?;
    axum::serve(
        http_listener,
        http_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = http_shutdown.changed().await;
        tracing::info!("Shutting down client portal...");
        worker_cancel.cancel();
    })
    .await
    .context("HTTP server error")?;

    Ok(())
}
