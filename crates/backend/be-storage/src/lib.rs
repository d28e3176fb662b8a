//! Signed artifact storage using OpenDAL.
//!
//! Uploaded update packages are streamed into the backend while their SHA-256
//! is computed, then the digest is signed by the [`SignatureAuthority`]. An
//! artifact is only ever returned to the caller with a hash and a signature;
//! partially written or unsigned uploads are purged.
//!
//! ## Environment Variables
//!
//! - `ARTIFACT_STORAGE_BACKEND`: Either "fs" (default) or "s3"
//!
//! ### For filesystem backend:
//! - `ARTIFACT_STORAGE_FS_ROOT`: Root directory for artifacts (default: "./updates")
//!
//! ### For S3 backend:
//! - `ARTIFACT_STORAGE_S3_BUCKET`: S3 bucket name (required)
//! - `ARTIFACT_STORAGE_S3_REGION`: S3 region (required)
//! - `ARTIFACT_STORAGE_S3_ENDPOINT`: S3 endpoint URL (optional, for S3-compatible services)
//! - `ARTIFACT_STORAGE_S3_ACCESS_KEY_ID`: AWS access key ID (optional)
//! - `ARTIFACT_STORAGE_S3_SECRET_ACCESS_KEY`: AWS secret access key (optional)

mod error;

pub use error::{StorageError, StorageResult};

use std::sync::Arc;

use artifact_signing::SignatureAuthority;
use bon::bon;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream::BoxStream};
use opendal::{Operator, Writer, services};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const DEFAULT_FS_ROOT: &str = "./updates";
const MAX_EXTENSION_LEN: usize = 8;

#[derive(Debug, Clone)]
pub enum StorageConfig {
    FS {
        root: String,
    },
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::FS {
            root: DEFAULT_FS_ROOT.to_string(),
        }
    }
}

impl StorageConfig {
    /// Create configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `StorageError::MissingEnvVar` if required environment variables
    /// are not set when using S3 backend.
    pub fn from_env() -> StorageResult<Self> {
        let backend = std::env::var("ARTIFACT_STORAGE_BACKEND")
            .unwrap_or_else(|_| "fs".to_string())
            .to_lowercase();

        match backend.as_str() {
            "s3" => {
                let bucket = std::env::var("ARTIFACT_STORAGE_S3_BUCKET")
                    .map_err(|_| StorageError::missing_env_var("ARTIFACT_STORAGE_S3_BUCKET"))?;
                let region = std::env::var("ARTIFACT_STORAGE_S3_REGION")
                    .map_err(|_| StorageError::missing_env_var("ARTIFACT_STORAGE_S3_REGION"))?;
                let endpoint = std::env::var("ARTIFACT_STORAGE_S3_ENDPOINT").ok();
                let access_key_id = std::env::var("ARTIFACT_STORAGE_S3_ACCESS_KEY_ID").ok();
                let secret_access_key =
                    std::env::var("ARTIFACT_STORAGE_S3_SECRET_ACCESS_KEY").ok();

                Ok(StorageConfig::S3 {
                    bucket,
                    region,
                    endpoint,
                    access_key_id,
                    secret_access_key,
                })
            }
            "fs" => {
                let root = std::env::var("ARTIFACT_STORAGE_FS_ROOT")
                    .unwrap_or_else(|_| DEFAULT_FS_ROOT.to_string());
                Ok(StorageConfig::FS { root })
            }
            other => Err(StorageError::configuration(format!(
                "unknown storage backend '{other}', expected 'fs' or 's3'"
            ))),
        }
    }
}

/// A persisted, signed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Opaque storage name, unrelated to the uploaded file name.
    pub handle: String,
    /// Lowercase hex SHA-256 of the stored bytes.
    pub hash: String,
    /// Base64 signature over `hash`.
    pub signature: String,
    pub size: u64,
}

/// A stored artifact opened for streaming.
pub struct ArtifactReader {
    pub size: u64,
    pub stream: BoxStream<'static, StorageResult<Bytes>>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    operator: Operator,
    config: StorageConfig,
    authority: Arc<SignatureAuthority>,
}

#[bon]
impl ArtifactStore {
    /// Create a new artifact store with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operator cannot be created.
    #[builder]
    pub fn new(config: StorageConfig, authority: Arc<SignatureAuthority>) -> StorageResult<Self> {
        let operator = Self::create_operator(&config)?;
        Ok(Self {
            operator,
            config,
            authority,
        })
    }

    /// Create a new artifact store using environment variables for configuration
    pub fn from_env(authority: Arc<SignatureAuthority>) -> StorageResult<Self> {
        let config = StorageConfig::from_env()?;
        info!("Initializing artifact store with config: {:?}", config);
        Self::builder().config(config).authority(authority).build()
    }

    fn create_operator(config: &StorageConfig) -> StorageResult<Operator> {
        match config {
            StorageConfig::FS { root } => {
                debug!("Creating filesystem storage operator with root: {}", root);

                std::fs::create_dir_all(root)?;

                let builder = services::Fs::default().root(root);

                Ok(Operator::new(builder)?.finish())
            }
            StorageConfig::S3 {
                bucket,
                region,
                endpoint,
                access_key_id,
                secret_access_key,
            } => {
                debug!("Creating S3 storage operator for bucket: {}", bucket);

                let mut builder = services::S3::default().bucket(bucket).region(region);

                if let Some(ep) = endpoint {
                    builder = builder.endpoint(ep);
                }

                if let Some(key_id) = access_key_id {
                    builder = builder.access_key_id(key_id);
                }

                if let Some(secret) = secret_access_key {
                    builder = builder.secret_access_key(secret);
                }

                Ok(Operator::new(builder)?.finish())
            }
        }
    }

    pub fn calculate_sha256(content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }

    /// Build a fresh storage name. Only a short alphanumeric extension is
    /// carried over from the uploaded name.
    pub fn generate_handle(original_name: &str) -> String {
        format!("{}.{}", Uuid::new_v4(), Self::extension_of(original_name))
    }

    pub fn extension_of(original_name: &str) -> String {
        original_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| {
                !ext.is_empty()
                    && ext.len() <= MAX_EXTENSION_LEN
                    && ext.chars().all(|c| c.is_ascii_alphanumeric())
            })
            .unwrap_or_else(|| "bin".to_string())
    }

    fn validate_handle(handle: &str) -> StorageResult<()> {
        let valid = !handle.is_empty()
            && !handle.starts_with('.')
            && handle
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if valid {
            Ok(())
        } else {
            Err(StorageError::invalid_handle(handle))
        }
    }

    /// Stream an upload into storage, hashing and signing it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Cancelled` if `cancel` fires, `StorageError::Stream`
    /// if the source stream fails and `StorageError::Signing` if the hash
    /// cannot be signed. In every error case nothing is left in storage.
    #[instrument(skip(self, stream, cancel))]
    pub async fn save<S, E>(
        &self,
        mut stream: S,
        original_name: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<StoredArtifact>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let handle = Self::generate_handle(original_name);
        debug!("Saving artifact '{}' as {}", original_name, handle);

        let mut writer = self.operator.writer(&handle).await?;

        let (hash, size) = match Self::write_hashed(&mut writer, &mut stream, cancel).await {
            Ok(written) => written,
            Err(e) => {
                warn!("Artifact upload {} failed: {}", handle, e);
                if let Err(abort_err) = writer.abort().await {
                    debug!("Writer abort for {} failed: {}", handle, abort_err);
                }
                self.purge(&handle).await;
                return Err(e);
            }
        };

        let signature = match self.authority.sign(&hash) {
            Ok(signature) => signature,
            Err(e) => {
                warn!("Signing artifact {} failed, purging: {}", handle, e);
                self.purge(&handle).await;
                return Err(e.into());
            }
        };

        info!("Stored artifact {} ({} bytes, sha256 {})", handle, size, hash);

        Ok(StoredArtifact {
            handle,
            hash,
            signature,
            size,
        })
    }

    async fn write_hashed<S, E>(
        writer: &mut Writer,
        stream: &mut S,
        cancel: &CancellationToken,
    ) -> StorageResult<(String, u64)>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let mut hasher = Sha256::new();
        let mut size = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                next = stream.next() => next,
            };

            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| StorageError::stream(e.to_string()))?;

            hasher.update(&chunk);
            size += chunk.len() as u64;
            writer.write(chunk).await?;
        }

        writer.close().await?;

        Ok((hex::encode(hasher.finalize()), size))
    }

    async fn purge(&self, handle: &str) {
        if let Err(e) = self.operator.delete(handle).await {
            warn!("Failed to purge artifact {}: {}", handle, e);
        }
    }

    /// Read a stored artifact. Returns `None` if it does not exist.
    pub async fn get(&self, handle: &str) -> StorageResult<Option<Vec<u8>>> {
        Self::validate_handle(handle)?;
        debug!("Reading artifact {}", handle);

        match self.operator.read(handle).await {
            Ok(content) => Ok(Some(content.to_vec())),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Open a stored artifact as a byte stream without buffering it.
    /// Returns `None` if it does not exist.
    pub async fn open(&self, handle: &str) -> StorageResult<Option<ArtifactReader>> {
        Self::validate_handle(handle)?;

        let size = match self.operator.stat(handle).await {
            Ok(meta) => meta.content_length(),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        debug!("Streaming artifact {} ({} bytes)", handle, size);

        let stream = self
            .operator
            .reader(handle)
            .await?
            .into_bytes_stream(..)
            .await?
            .map(|chunk| chunk.map_err(StorageError::from))
            .boxed();

        Ok(Some(ArtifactReader { size, stream }))
    }

    async fn streamed_sha256(&self, handle: &str) -> StorageResult<Option<String>> {
        let Some(mut reader) = self.open(handle).await? else {
            return Ok(None);
        };
        let mut hasher = Sha256::new();
        while let Some(chunk) = reader.stream.next().await {
            hasher.update(&chunk?);
        }
        Ok(Some(hex::encode(hasher.finalize())))
    }

    /// Recompute an artifact's hash and compare it, ignoring case.
    /// A missing or unreadable artifact never matches.
    pub async fn verify_hash(&self, handle: &str, expected_hash: &str) -> bool {
        match self.streamed_sha256(handle).await {
            Ok(Some(actual)) => {
                let matches = actual.eq_ignore_ascii_case(expected_hash.trim());
                if !matches {
                    warn!(
                        "Hash mismatch for artifact {}: expected {}, got {}",
                        handle, expected_hash, actual
                    );
                }
                matches
            }
            Ok(None) => {
                warn!("Hash check for missing artifact {}", handle);
                false
            }
            Err(e) => {
                warn!("Hash check for artifact {} failed: {}", handle, e);
                false
            }
        }
    }

    /// Remove an artifact. Deleting a missing artifact succeeds.
    pub async fn delete(&self, handle: &str) -> StorageResult<()> {
        Self::validate_handle(handle)?;
        debug!("Deleting artifact {}", handle);

        match self.operator.delete(handle).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if an artifact exists
    ///
    /// # Errors
    ///
    /// Returns an error if the stat operation fails (other than NotFound).
    pub async fn exists(&self, handle: &str) -> StorageResult<bool> {
        Self::validate_handle(handle)?;
        match self.operator.stat(handle).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn authority(&self) -> &Arc<SignatureAuthority> {
        &self.authority
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn get_backend_name(&self) -> &str {
        match self.config {
            StorageConfig::S3 { .. } => "s3",
            StorageConfig::FS { .. } => "fs",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PRIVATE_KEY: &str =
        include_str!("../../../common/artifact-signing/testdata/test-private-key.pem");
    const TEST_PUBLIC_KEY: &str =
        include_str!("../../../common/artifact-signing/testdata/test-public-key.pem");

    const HELLO_HASH: &str = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";

    fn store_with(
        authority: SignatureAuthority,
    ) -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::builder()
            .config(StorageConfig::FS {
                root: dir.path().to_string_lossy().into_owned(),
            })
            .authority(Arc::new(authority))
            .build()
            .unwrap();
        (dir, store)
    }

    fn test_store() -> (tempfile::TempDir, ArtifactStore) {
        store_with(SignatureAuthority::from_private_pem(TEST_PRIVATE_KEY).unwrap())
    }

    fn chunks(
        parts: &[&'static [u8]],
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    fn file_count(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[test]
    fn test_calculate_sha256() {
        assert_eq!(ArtifactStore::calculate_sha256(b"Hello, World!"), HELLO_HASH);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(ArtifactStore::extension_of("firmware-2.1.0.BIN"), "bin");
        assert_eq!(ArtifactStore::extension_of("package.tar.gz"), "gz");
        assert_eq!(ArtifactStore::extension_of("image.zip"), "zip");
        assert_eq!(ArtifactStore::extension_of("no_extension"), "bin");
        assert_eq!(ArtifactStore::extension_of("evil.../../x"), "bin");
        assert_eq!(ArtifactStore::extension_of("long.extensionname"), "bin");
    }

    #[test]
    fn test_generate_handle_ignores_original_name() {
        let a = ArtifactStore::generate_handle("../../etc/passwd.img");
        let b = ArtifactStore::generate_handle("../../etc/passwd.img");
        assert_ne!(a, b);
        assert!(!a.contains('/'));
        assert!(!a.contains("passwd"));
        assert!(a.ends_with(".img"));
    }

    #[test]
    fn test_storage_config_default() {
        match StorageConfig::default() {
            StorageConfig::FS { root } => assert_eq!(root, "./updates"),
            _ => panic!("Expected Filesystem config"),
        }
    }

    #[tokio::test]
    async fn test_save_hashes_and_signs() {
        let (_dir, store) = test_store();
        let cancel = CancellationToken::new();

        let artifact = store
            .save(chunks(&[b"Hello, ", b"World!"]), "fw.bin", &cancel)
            .await
            .unwrap();

        assert_eq!(artifact.hash, HELLO_HASH);
        assert_eq!(artifact.size, 13);
        assert!(store.authority().verify(&artifact.hash, &artifact.signature));

        let content = store.get(&artifact.handle).await.unwrap().unwrap();
        assert_eq!(content, b"Hello, World!");
    }

    #[tokio::test]
    async fn test_verify_hash_is_case_insensitive() {
        let (_dir, store) = test_store();
        let artifact = store
            .save(chunks(&[b"Hello, World!"]), "fw.bin", &CancellationToken::new())
            .await
            .unwrap();

        assert!(store.verify_hash(&artifact.handle, HELLO_HASH).await);
        assert!(
            store
                .verify_hash(&artifact.handle, &HELLO_HASH.to_uppercase())
                .await
        );
        assert!(!store.verify_hash(&artifact.handle, &"0".repeat(64)).await);
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let (_dir, store) = test_store();
        let handle = ArtifactStore::generate_handle("fw.bin");

        assert!(store.get(&handle).await.unwrap().is_none());
        assert!(!store.exists(&handle).await.unwrap());
        assert!(!store.verify_hash(&handle, HELLO_HASH).await);
    }

    #[tokio::test]
    async fn test_open_streams_stored_bytes() {
        let (_dir, store) = test_store();
        let big = vec![0xA5u8; 256 * 1024];
        let artifact = store
            .save(
                futures::stream::iter(vec![
                    Ok::<_, std::io::Error>(Bytes::from(big.clone())),
                    Ok(Bytes::from_static(b"tail")),
                ]),
                "fw.bin",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let reader = store.open(&artifact.handle).await.unwrap().unwrap();
        assert_eq!(reader.size, artifact.size);

        let chunks: Vec<Bytes> = reader.stream.map(|c| c.unwrap()).collect().await;
        let content: Vec<u8> = chunks.concat();
        assert_eq!(content.len(), big.len() + 4);
        assert_eq!(ArtifactStore::calculate_sha256(&content), artifact.hash);
    }

    #[tokio::test]
    async fn test_open_missing_artifact() {
        let (_dir, store) = test_store();
        let handle = ArtifactStore::generate_handle("fw.bin");
        assert!(store.open(&handle).await.unwrap().is_none());
        assert!(matches!(
            store.open("../secret").await,
            Err(StorageError::InvalidHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, store) = test_store();
        let artifact = store
            .save(chunks(&[b"payload"]), "fw.bin", &CancellationToken::new())
            .await
            .unwrap();

        assert!(store.exists(&artifact.handle).await.unwrap());
        store.delete(&artifact.handle).await.unwrap();
        assert!(!store.exists(&artifact.handle).await.unwrap());
        store.delete(&artifact.handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_like_handles() {
        let (_dir, store) = test_store();
        assert!(matches!(
            store.get("../secret").await,
            Err(StorageError::InvalidHandle(_))
        ));
        assert!(!store.verify_hash("a/b", HELLO_HASH).await);
    }

    #[tokio::test]
    async fn test_cancelled_save_leaves_nothing_behind() {
        let (dir, store) = test_store();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store
            .save(chunks(&[b"partial"]), "fw.bin", &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(file_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_nothing_behind() {
        let (dir, store) = test_store();
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"first chunk")),
            Err(std::io::Error::other("connection reset")),
        ]);

        let err = store
            .save(stream, "fw.bin", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Stream(_)));
        assert_eq!(file_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_unsigned_artifact_is_purged() {
        let (dir, store) =
            store_with(SignatureAuthority::from_public_pem(TEST_PUBLIC_KEY).unwrap());

        let err = store
            .save(chunks(&[b"payload"]), "fw.bin", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Signing(_)));
        assert_eq!(file_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_concurrent_saves_get_distinct_handles() {
        let (_dir, store) = test_store();
        let store = Arc::new(store);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .save(chunks(&[b"same bytes"]), "fw.bin", &CancellationToken::new())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut handles = std::collections::HashSet::new();
        for task in tasks {
            handles.insert(task.await.unwrap().handle);
        }
        assert_eq!(handles.len(), 8);
    }
}
