use std::path::PathBuf;

use artifact_signing::SigningError;
use thiserror::Error;

pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to parse settings file {path}: {message}")]
    Settings { path: PathBuf, message: String },

    #[error("Authority public key unavailable: {0}")]
    PublicKeyUnavailable(String),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed with status {0}")]
    DownloadStatus(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Install script exited with {code:?}: {stderr}")]
    InstallFailed { code: Option<i32>, stderr: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
