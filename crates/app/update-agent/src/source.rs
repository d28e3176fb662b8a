use std::{path::Path, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use update_models::AgentRelease;
use uuid::Uuid;

use crate::{
    config::AgentConfig,
    error::{AgentError, AgentResult},
};

pub const API_KEY_HEADER: &str = "X-API-Key";
const FEED_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Where the agent learns about releases and fetches their artifacts.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn active_releases(&self) -> AgentResult<Vec<AgentRelease>>;

    /// Write the artifact of `update_id` to `dest`. On any error no file is
    /// left behind at `dest`.
    async fn download(
        &self,
        update_id: Uuid,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> AgentResult<u64>;
}

/// Reads releases from a client portal and artifacts from the authority.
pub struct HttpUpdateSource {
    http: reqwest::Client,
    portal_url: String,
    authority_url: String,
    api_key: Option<String>,
}

impl HttpUpdateSource {
    pub fn new(config: &AgentConfig) -> AgentResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            portal_url: config.client_portal_api_url.trim_end_matches('/').to_string(),
            authority_url: config.authority_api_url.trim_end_matches('/').to_string(),
            api_key: config.device_api_key.clone(),
        })
    }
}

#[async_trait]
impl UpdateSource for HttpUpdateSource {
    async fn active_releases(&self) -> AgentResult<Vec<AgentRelease>> {
        let url = format!("{}/api/releases/active", self.portal_url);
        let mut request = self.http.get(&url).timeout(FEED_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        let releases = request
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<AgentRelease>>()
            .await?;
        debug!("Portal returned {} active releases", releases.len());
        Ok(releases)
    }

    async fn download(
        &self,
        update_id: Uuid,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> AgentResult<u64> {
        let url = format!("{}/api/updates/{}/download", self.authority_url, update_id);
        let response = self.http.get(&url).timeout(DOWNLOAD_TIMEOUT).send().await?;
        if !response.status().is_success() {
            return Err(AgentError::DownloadStatus(response.status().as_u16()));
        }
        write_stream(response.bytes_stream(), dest, cancel).await
    }
}

/// Stream `body` into a new file at `dest`, removing the partial file when
/// the stream fails or `cancel` fires.
pub async fn write_stream<S, E>(
    body: S,
    dest: &Path,
    cancel: &CancellationToken,
) -> AgentResult<u64>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    AgentError: From<E>,
{
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let result = tokio::select! {
        result = copy_into(body, dest) => result,
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
    };

    if result.is_err()
        && let Err(e) = tokio::fs::remove_file(dest).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove partial download {}: {}", dest.display(), e);
    }
    result
}

async fn copy_into<S, E>(body: S, dest: &Path) -> AgentResult<u64>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    AgentError: From<E>,
{
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    let mut body = std::pin::pin!(body);
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    #[tokio::test]
    async fn test_write_stream_writes_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("update-1.0.1.bin");
        let body = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);

        let written = write_stream(body, &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 11);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_failed_stream_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("update-1.0.1.bin");
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("connection reset")),
        ]);

        let err = write_stream(body, &dest, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Io(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_cancelled_download_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("update-1.0.1.bin");
        let body = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"partial"))])
            .chain(stream::pending());
        let cancel = CancellationToken::new();

        let writer = write_stream(body, &dest, &cancel);
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(writer, canceller);

        assert!(result.unwrap_err().is_cancelled());
        assert!(!dest.exists());
    }
}
