use std::time::Duration;

use crate::error::{SyncError, SyncResult};

pub const DEFAULT_INTERVAL_MINUTES: u64 = 5;
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 10;

#[derive(Clone)]
pub struct SyncConfig {
    /// Base URL of the update authority, e.g. `http://authority:3000`.
    pub authority_api_url: Option<String>,
    pub interval: Duration,
    pub initial_delay: Duration,
    /// Shared secret for incoming release webhooks.
    pub webhook_secret: Option<String>,
    /// When set, agents must send it as `X-API-Key` to read releases.
    pub device_api_key: Option<String>,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("authority_api_url", &self.authority_api_url)
            .field("interval", &self.interval)
            .field("initial_delay", &self.initial_delay)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .field("device_api_key", &self.device_api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            authority_api_url: None,
            interval: Duration::from_secs(DEFAULT_INTERVAL_MINUTES * 60),
            initial_delay: Duration::from_secs(DEFAULT_INITIAL_DELAY_SECS),
            webhook_secret: None,
            device_api_key: None,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_u64_var(name: &str, default: u64) -> SyncResult<u64> {
    match non_empty_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| SyncError::configuration(format!("{name} must be an integer, got '{raw}'"))),
        None => Ok(default),
    }
}

impl SyncConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> SyncResult<Self> {
        let interval_minutes = parse_u64_var("SYNC_INTERVAL_MINUTES", DEFAULT_INTERVAL_MINUTES)?;
        if interval_minutes == 0 {
            return Err(SyncError::configuration(
                "SYNC_INTERVAL_MINUTES must be at least 1",
            ));
        }
        let initial_delay_secs =
            parse_u64_var("SYNC_INITIAL_DELAY_SECS", DEFAULT_INITIAL_DELAY_SECS)?;

        Ok(Self {
            authority_api_url: non_empty_var("AUTHORITY_API_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            interval: Duration::from_secs(interval_minutes * 60),
            initial_delay: Duration::from_secs(initial_delay_secs),
            webhook_secret: non_empty_var("WEBHOOK_SECRET"),
            device_api_key: non_empty_var("DEVICE_API_KEY"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.initial_delay, Duration::from_secs(10));
        assert!(config.authority_api_url.is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = SyncConfig {
            webhook_secret: Some("hunter2".into()),
            device_api_key: Some("device-key".into()),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("device-key"));
        assert!(debug.contains("[REDACTED]"));
    }
}
