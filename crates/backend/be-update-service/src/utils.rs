//! Utility functions for parsing and validation

use reqwest::Url;
use semver::Version;
use tracing::{debug, instrument};

use crate::error::{UpdateServiceError, UpdateServiceResult};

/// Validate an uploaded version string and return it trimmed.
/// A leading `v` is tolerated for parsing but kept in the stored value.
#[instrument]
pub fn validate_version(version: &str) -> UpdateServiceResult<String> {
    let trimmed = version.trim();
    let candidate = trimmed.strip_prefix('v').unwrap_or(trimmed);
    match Version::parse(candidate) {
        Ok(parsed) => {
            debug!("Parsed version {}", parsed);
            Ok(trimmed.to_string())
        }
        Err(e) => {
            debug!("Rejected version '{}': {}", trimmed, e);
            Err(UpdateServiceError::InvalidVersion(trimmed.to_string()))
        }
    }
}

/// File name offered to downloaders. Never the storage handle.
pub fn download_file_name(version: &str) -> String {
    let safe: String = version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("update-{safe}.bin")
}

/// The `ping` sibling of a webhook URL, e.g.
/// `https://portal/api/webhooks/release-notification` ->
/// `https://portal/api/webhooks/ping`.
pub fn ping_url(webhook_url: &str) -> UpdateServiceResult<Url> {
    let url = Url::parse(webhook_url)
        .map_err(|e| UpdateServiceError::validation(format!("invalid webhook URL: {e}")))?;
    url.join("ping")
        .map_err(|e| UpdateServiceError::validation(format!("invalid webhook URL: {e}")))
}

/// Only absolute http(s) URLs can receive webhooks.
pub fn validate_webhook_url(webhook_url: &str) -> UpdateServiceResult<()> {
    let url = Url::parse(webhook_url.trim())
        .map_err(|e| UpdateServiceError::validation(format!("invalid webhook URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(UpdateServiceError::validation(format!(
            "webhook URL scheme must be http or https, got '{other}'"
        ))),
    }
}
