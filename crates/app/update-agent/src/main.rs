use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use dotenv::dotenv;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use update_agent::{
    AgentConfig, HttpUpdateSource, ScriptInstaller, UpdateAgent, Verifier, VersionStore,
    config::SETTINGS_FILE,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let app_level = if cfg!(debug_assertions) {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let global_filter = Targets::new()
        .with_default(LevelFilter::WARN)
        .with_target("update_agent", app_level)
        .with_target("artifact_signing", app_level)
        .with_target("hyper", LevelFilter::OFF)
        .with_target("tokio", LevelFilter::OFF);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(global_filter)
        .try_init()?;

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("UPDATE_AGENT_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE));
    let config = AgentConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let authority = config
        .load_public_key()
        .context("Cannot verify updates without the authority public key")?;
    let source = HttpUpdateSource::new(&config).context("Failed to build HTTP client")?;

    let agent = UpdateAgent::new(
        Arc::new(source),
        Verifier::new(Arc::new(authority)),
        Arc::new(ScriptInstaller::new(config.install_script.clone())),
        VersionStore::new(config.current_version_file()),
        config.download_directory.clone(),
    )
    .with_auto_install(config.auto_install)
    .with_interval(config.check_interval());

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install CTRL+C signal handler: {}", e);
            return;
        }
        tracing::info!("Received CTRL+C, initiating shutdown...");
        signal_cancel.cancel();
    });

    agent.run(cancel).await;
    Ok(())
}
