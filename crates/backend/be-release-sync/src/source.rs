//! Where active releases are fetched from.

use async_trait::async_trait;
use tracing::{debug, instrument};
use update_models::ReleaseSyncRecord;

use crate::error::{SyncError, SyncResult};

pub const ACTIVE_RELEASES_PATH: &str = "/api/sync/releases/active";

#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Every active release on the authority, each with its update metadata.
    async fn fetch_active_releases(&self) -> SyncResult<Vec<ReleaseSyncRecord>>;
}

/// Reads the authority's sync feed over HTTP.
pub struct HttpReleaseSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReleaseSource {
    pub fn new(base_url: impl Into<String>) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn fetch_active_releases(&self) -> SyncResult<Vec<ReleaseSyncRecord>> {
        let url = format!("{}{}", self.base_url, ACTIVE_RELEASES_PATH);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(SyncError::UnexpectedStatus(response.status().as_u16()));
        }

        let records: Vec<ReleaseSyncRecord> = response.json().await?;
        debug!("Fetched {} active releases", records.len());
        Ok(records)
    }
}
