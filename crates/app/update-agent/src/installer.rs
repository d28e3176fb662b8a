use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    /// Nothing was run. The verified artifact stays on disk.
    Skipped,
}

#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, artifact: &Path, version: &str) -> AgentResult<InstallOutcome>;
}

/// Runs an executable with the artifact path as its only argument.
pub struct ScriptInstaller {
    script: PathBuf,
}

impl ScriptInstaller {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl Installer for ScriptInstaller {
    async fn install(&self, artifact: &Path, version: &str) -> AgentResult<InstallOutcome> {
        if !tokio::fs::try_exists(&self.script).await.unwrap_or(false) {
            warn!(
                "Install script not found at {}, update {} downloaded and verified but not installed",
                self.script.display(),
                version
            );
            return Ok(InstallOutcome::Skipped);
        }

        info!("Installing update {} with {}", version, self.script.display());
        let output = tokio::process::Command::new(&self.script)
            .arg(artifact)
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            info!(
                "Update {} installed: {}",
                version,
                String::from_utf8_lossy(&output.stdout).trim()
            );
            Ok(InstallOutcome::Installed)
        } else {
            Err(AgentError::InstallFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
