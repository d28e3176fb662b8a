use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use artifact_signing::{SignatureAuthority, SigningConfig};
use be_deployment_service::AppState as DeploymentState;
use be_remote_db::Repositories;
use be_storage::{ArtifactStore, StorageConfig};
use be_update_service::init_update_service;
use tokio_util::sync::CancellationToken;

/// Configuration for running the authority server.
pub struct ServerConfig {
    /// Postgres URL. `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub http_addr: SocketAddr,
    pub signing: SigningConfig,
    pub storage: StorageConfig,
    /// When this receiver gets a value, the server shuts down gracefully.
    pub shutdown: tokio::sync::watch::Receiver<()>,
}

impl ServerConfig {
    pub fn from_env(shutdown: tokio::sync::watch::Receiver<()>) -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("REMOTE_DATABASE_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            http_addr: std::env::var("HTTP_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
                .parse::<SocketAddr>()
                .context("Invalid HTTP_ADDR format")?,
            signing: SigningConfig::from_env(),
            storage: StorageConfig::from_env().context("Failed to load storage config")?,
            shutdown,
        })
    }
}

async fn init_posthog() {
    if let Some(posthog_key) = std::env::var("POSTHOG_API_KEY")
        .ok()
        .filter(|s| !s.is_empty())
    {
        match posthog_rs::init_global(posthog_key.as_str()).await {
            Ok(()) => tracing::info!("PostHog analytics initialized"),
            Err(e) => tracing::warn!("Failed to initialize PostHog: {}", e),
        }
    } else {
        tracing::info!("POSTHOG_API_KEY not set, analytics disabled");
    }
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    init_posthog().await;

    let repos = Repositories::connect(config.database_url.as_deref())
        .await
        .context("Failed to open the database")?;

    let authority = Arc::new(
        SignatureAuthority::load(&config.signing).context("Failed to load signing keys")?,
    );
    if !authority.can_sign() {
        tracing::warn!("Signing key not loaded, uploads will be refused");
    }

    let store = Arc::new(
        ArtifactStore::builder()
            .config(config.storage)
            .authority(authority)
            .build()
            .context("Failed to initialize artifact storage")?,
    );

    let uploads_cancel = CancellationToken::new();
    let update_router = init_update_service(&repos, store, uploads_cancel.clone());
    let deployment_router =
        be_deployment_service::create_router(Arc::new(DeploymentState::new(&repos)));

    let health_route = axum::Router::new().route(
        "/health",
        axum::routing::get(|| async { axum::http::StatusCode::OK }),
    );

    let http_router = update_router
        .merge(deployment_router)
        .merge(health_route);

    tracing::info!("Starting HTTP server at {}", config.http_addr);

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
        tracing::info!("Shutting down HTTP server...");
        uploads_cancel.cancel();
    })
    .await
    .context("HTTP server error")?;

    Ok(())
}
