use std::path::PathBuf;

use tracing::warn;

use crate::error::AgentResult;

pub const DEFAULT_VERSION: &str = "1.0.0";

/// Persisted marker of the installed version.
#[derive(Debug, Clone)]
pub struct VersionStore {
    path: PathBuf,
}

impl VersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn current(&self) -> String {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if !raw.trim().is_empty() => raw.trim().to_string(),
            Ok(_) => DEFAULT_VERSION.to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DEFAULT_VERSION.to_string(),
            Err(e) => {
                warn!(
                    "Failed to read current version from {}: {}",
                    self.path.display(),
                    e
                );
                DEFAULT_VERSION.to_string()
            }
        }
    }

    pub async fn persist(&self, version: &str) -> AgentResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, version).await?;
        Ok(())
    }
}
