use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use artifact_signing::SignatureAuthority;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AgentError, AgentResult};

pub const SETTINGS_FILE: &str = "update-agent.json";
pub const ENV_PREFIX: &str = "UPDATE_AGENT_";
pub const CURRENT_VERSION_FILE: &str = "current-version.txt";

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Base URL of the client portal serving `/api/releases/active`.
    pub client_portal_api_url: String,
    /// Base URL of the update authority serving artifact downloads.
    pub authority_api_url: String,
    /// Sent as `X-API-Key` to the portal.
    pub device_api_key: Option<String>,
    pub check_interval_minutes: u64,
    pub auto_install: bool,
    pub download_directory: PathBuf,
    pub install_script: PathBuf,
    /// Inline PEM of the authority public key. Takes precedence over
    /// `public_key_path`.
    pub public_key_pem: Option<String>,
    pub public_key_path: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            client_portal_api_url: "http://localhost:3001".to_string(),
            authority_api_url: "http://localhost:3000".to_string(),
            device_api_key: None,
            check_interval_minutes: 60,
            auto_install: true,
            download_directory: PathBuf::from("./downloads"),
            install_script: PathBuf::from("./install.sh"),
            public_key_pem: None,
            public_key_path: PathBuf::from("./vendor-public-key.pem"),
        }
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("client_portal_api_url", &self.client_portal_api_url)
            .field("authority_api_url", &self.authority_api_url)
            .field("device_api_key", &self.device_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("check_interval_minutes", &self.check_interval_minutes)
            .field("auto_install", &self.auto_install)
            .field("download_directory", &self.download_directory)
            .field("install_script", &self.install_script)
            .field("public_key_path", &self.public_key_path)
            .finish()
    }
}

impl AgentConfig {
    /// Load settings from a JSON file (comments allowed), falling back to
    /// defaults when the file is absent, then apply `UPDATE_AGENT_*`
    /// environment overrides.
    pub fn load(path: &Path) -> AgentResult<Self> {
        let mut config: Self = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json_lenient::from_str(&raw).map_err(|e| AgentError::Settings {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            info!("{} not found, using default settings", path.display());
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        debug!("Loaded agent config: {:?}", config);
        Ok(config)
    }

    /// Apply overrides looked up by their full variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> AgentResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(url) = var("CLIENT_PORTAL_API_URL") {
            self.client_portal_api_url = url;
        }
        if let Some(url) = var("AUTHORITY_API_URL") {
            self.authority_api_url = url;
        }
        if let Some(key) = var("DEVICE_API_KEY") {
            self.device_api_key = Some(key);
        }
        if let Some(raw) = var("CHECK_INTERVAL_MINUTES") {
            self.check_interval_minutes = raw.parse().map_err(|_| {
                AgentError::configuration(format!(
                    "{ENV_PREFIX}CHECK_INTERVAL_MINUTES must be an integer, got '{raw}'"
                ))
            })?;
        }
        if let Some(raw) = var("AUTO_INSTALL") {
            self.auto_install = match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(AgentError::configuration(format!(
                        "{ENV_PREFIX}AUTO_INSTALL must be a boolean, got '{raw}'"
                    )));
                }
            };
        }
        if let Some(dir) = var("DOWNLOAD_DIRECTORY") {
            self.download_directory = PathBuf::from(dir);
        }
        if let Some(script) = var("INSTALL_SCRIPT") {
            self.install_script = PathBuf::from(script);
        }
        if let Some(pem) = var("PUBLIC_KEY_PEM") {
            self.public_key_pem = Some(pem);
        }
        if let Some(path) = var("PUBLIC_KEY_PATH") {
            self.public_key_path = PathBuf::from(path);
        }
        Ok(())
    }

    fn validate(&self) -> AgentResult<()> {
        if self.check_interval_minutes == 0 {
            return Err(AgentError::configuration(
                "checkIntervalMinutes must be at least 1",
            ));
        }
        reqwest::Url::parse(&self.client_portal_api_url).map_err(|e| {
            AgentError::configuration(format!("invalid clientPortalApiUrl: {e}"))
        })?;
        reqwest::Url::parse(&self.authority_api_url)
            .map_err(|e| AgentError::configuration(format!("invalid authorityApiUrl: {e}")))?;
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes * 60)
    }

    pub fn current_version_file(&self) -> PathBuf {
        self.download_directory.join(CURRENT_VERSION_FILE)
    }

    /// Load the authority public key from local configuration. Verification
    /// never uses key material shipped alongside an artifact.
    pub fn load_public_key(&self) -> AgentResult<SignatureAuthority> {
        let pem = match &self.public_key_pem {
            Some(pem) => pem.clone(),
            None => {
                let pem = std::fs::read_to_string(&self.public_key_path).map_err(|e| {
                    AgentError::PublicKeyUnavailable(format!(
                        "{}: {e}",
                        self.public_key_path.display()
                    ))
                })?;
                info!(
                    "Loaded authority public key from {}",
                    self.public_key_path.display()
                );
                pem
            }
        };
        Ok(SignatureAuthority::from_public_pem(&pem)?)
    }
}
