//! The authority's catalog of published updates and the feeds built on it.

use std::sync::Arc;

use be_remote_db::{
    DbError, ReleaseRepository, Repositories, Repository, Update, UpdateRepository,
    UpdateSeverity, UpdateType,
};
use be_storage::{ArtifactReader, ArtifactStore, StoredArtifact};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use update_models::{ReleaseSyncRecord, UpdateMetadata, join_cve_list};
use uuid::Uuid;

use crate::{
    analytics,
    error::{UpdateServiceError, UpdateServiceResult},
    types::{UpdateDraft, UpdateMetadataPatch},
    utils::{download_file_name, validate_version},
};

#[derive(Clone)]
pub struct UpdateCatalog {
    updates: Arc<dyn UpdateRepository>,
    releases: Arc<dyn ReleaseRepository>,
    store: Arc<ArtifactStore>,
}

impl UpdateCatalog {
    pub fn new(repos: &Repositories, store: Arc<ArtifactStore>) -> Self {
        Self {
            updates: repos.updates.clone(),
            releases: repos.releases.clone(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Fail early with `VersionExists` before any bytes are stored.
    pub async fn ensure_version_free(&self, version: &str) -> UpdateServiceResult<()> {
        let version = validate_version(version)?;
        if self.updates.get_by_version(&version).await?.is_some() {
            return Err(UpdateServiceError::VersionExists(version));
        }
        Ok(())
    }

    pub async fn store_artifact<S, E>(
        &self,
        stream: S,
        original_name: &str,
        cancel: &CancellationToken,
    ) -> UpdateServiceResult<StoredArtifact>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        Ok(self.store.save(stream, original_name, cancel).await?)
    }

    /// Remove an artifact that will not be published.
    pub async fn discard(&self, artifact: &StoredArtifact) {
        if let Err(e) = self.store.delete(&artifact.handle).await {
            warn!("Failed to discard artifact {}: {}", artifact.handle, e);
        }
    }

    /// Record a stored artifact as a new update. The artifact is purged if
    /// the update cannot be recorded.
    #[instrument(skip_all, fields(version = ?draft.version, handle = %artifact.handle))]
    pub async fn publish(
        &self,
        draft: UpdateDraft,
        artifact: StoredArtifact,
    ) -> UpdateServiceResult<Update> {
        match self.record_update(draft, &artifact).await {
            Ok(update) => {
                info!(
                    "Published update {} version {} ({} bytes)",
                    update.id, update.version, update.file_size
                );
                analytics::track_update_published(
                    &update.version,
                    &update.severity.to_string(),
                    update.is_security_update,
                    update.file_size,
                );
                Ok(update)
            }
            Err(e) => {
                warn!("Publishing failed, purging artifact {}: {}", artifact.handle, e);
                self.discard(&artifact).await;
                Err(e)
            }
        }
    }

    async fn record_update(
        &self,
        draft: UpdateDraft,
        artifact: &StoredArtifact,
    ) -> UpdateServiceResult<Update> {
        let version = validate_version(
            draft
                .version
                .as_deref()
                .ok_or_else(|| UpdateServiceError::validation("version is required"))?,
        )?;
        let title = draft
            .title
            .ok_or_else(|| UpdateServiceError::validation("title is required"))?;
        if artifact.size == 0 {
            return Err(UpdateServiceError::MissingFile);
        }
        let file_size = i64::try_from(artifact.size)
            .map_err(|_| UpdateServiceError::validation("file is too large"))?;

        if self.updates.get_by_version(&version).await?.is_some() {
            return Err(UpdateServiceError::VersionExists(version));
        }

        let now = Utc::now();
        let is_security_update = draft
            .is_security_update
            .unwrap_or(!draft.security_fixes.is_empty());
        let update = Update {
            id: Uuid::now_v7(),
            version: version.clone(),
            title,
            description: draft.description,
            changelog: draft.changelog,
            security_fixes: draft.security_fixes,
            file_path: artifact.handle.clone(),
            file_hash: artifact.hash.clone(),
            digital_signature: artifact.signature.clone(),
            file_size,
            update_type: draft.update_type.unwrap_or(UpdateType::Feature),
            severity: draft.severity.unwrap_or(UpdateSeverity::Medium),
            is_security_update,
            target_device_types: draft.target_device_types,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        match self.updates.create(update).await {
            Ok(update) => Ok(update),
            Err(e) if e.is_duplicate() => Err(UpdateServiceError::VersionExists(version)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self, include_inactive: bool) -> UpdateServiceResult<Vec<Update>> {
        let updates = if include_inactive {
            self.updates.list().await?
        } else {
            self.updates.list_active().await?
        };
        Ok(updates)
    }

    pub async fn get(&self, id: Uuid) -> UpdateServiceResult<Update> {
        self.updates
            .get(id)
            .await?
            .ok_or_else(|| UpdateServiceError::not_found("update", id))
    }

    #[instrument(skip(self, patch))]
    pub async fn edit(&self, id: Uuid, patch: UpdateMetadataPatch) -> UpdateServiceResult<Update> {
        let mut update = self.get(id).await?;

        if let Some(title) = patch.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(UpdateServiceError::validation("title must not be empty"));
            }
            update.title = title;
        }
        if let Some(description) = patch.description {
            update.description = Some(description);
        }
        if let Some(changelog) = patch.changelog {
            update.changelog = Some(changelog);
        }
        if let Some(security_fixes) = patch.security_fixes {
            update.security_fixes = security_fixes;
        }
        if let Some(update_type) = patch.update_type {
            update.update_type = update_type;
        }
        if let Some(severity) = patch.severity {
            update.severity = severity;
        }
        if let Some(is_security_update) = patch.is_security_update {
            update.is_security_update = is_security_update;
        }
        if let Some(is_active) = patch.is_active {
            update.is_active = is_active;
        }
        update.updated_at = Utc::now();

        Ok(self.updates.update(update).await?)
    }

    /// Delete an update nothing releases, then purge its artifact.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> UpdateServiceResult<()> {
        let update = self.get(id).await?;

        let releases = self.releases.list_by_update(id).await?;
        if !releases.is_empty() {
            return Err(UpdateServiceError::UpdateInUse {
                id,
                releases: releases.len(),
            });
        }

        match self.updates.delete(id).await {
            Ok(true) => {}
            Ok(false) => return Err(UpdateServiceError::not_found("update", id)),
            Err(DbError::ForeignKeyViolation { .. }) => {
                return Err(UpdateServiceError::UpdateInUse { id, releases: 1 });
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.store.delete(&update.file_path).await {
            warn!("Update {} deleted but artifact purge failed: {}", id, e);
        }
        info!("Deleted update {} version {}", id, update.version);
        Ok(())
    }

    /// The update and a stream over its artifact.
    #[instrument(skip(self))]
    pub async fn download(&self, id: Uuid) -> UpdateServiceResult<(Update, ArtifactReader)> {
        let update = self.get(id).await?;
        match self.store.open(&update.file_path).await {
            Ok(Some(reader)) => {
                analytics::track_artifact_download(&update.version, update.file_size);
                Ok((update, reader))
            }
            Ok(None) => {
                analytics::track_download_failed(&update.version, "artifact_missing");
                Err(UpdateServiceError::ArtifactMissing(update.file_path))
            }
            Err(e) => {
                analytics::track_download_failed(&update.version, "storage_error");
                Err(e.into())
            }
        }
    }

    /// Active releases with their update metadata, newest release first.
    /// Releases whose update is gone are left out.
    pub async fn sync_records(&self) -> UpdateServiceResult<Vec<ReleaseSyncRecord>> {
        let releases = self.releases.list_active().await?;
        let mut records = Vec::with_capacity(releases.len());

        for release in releases {
            let Some(update) = self.updates.get(release.update_id).await? else {
                warn!(
                    "Active release {} references missing update {}",
                    release.id, release.update_id
                );
                continue;
            };
            records.push(ReleaseSyncRecord {
                release_id: release.id,
                update_id: update.id,
                version: update.version.clone(),
                release_date: release.release_date,
                is_mandatory: release.is_mandatory,
                max_postpone_days: release.max_postpone_days,
                severity: update.severity.to_string(),
                changelog: update.changelog.clone(),
                cve_list: cve_list(&update.security_fixes),
                file_hash: update.file_hash.clone(),
                signature: update.digital_signature.clone(),
                file_name: download_file_name(&update.version),
                file_size_bytes: update.file_size,
            });
        }
        Ok(records)
    }

    pub async fn metadata(&self, id: Uuid) -> UpdateServiceResult<UpdateMetadata> {
        let update = self.get(id).await?;
        Ok(UpdateMetadata {
            id: update.id,
            file_name: download_file_name(&update.version),
            cve_list: cve_list(&update.security_fixes),
            version: update.version,
            file_hash: update.file_hash,
            signature: update.digital_signature,
            file_size_bytes: update.file_size,
            changelog: update.changelog,
        })
    }
}

fn cve_list(fixes: &[String]) -> Option<String> {
    (!fixes.is_empty()).then(|| join_cve_list(fixes))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::convert::Infallible;

    use artifact_signing::SignatureAuthority;
    use be_remote_db::Release;
    use be_storage::StorageConfig;
    use futures::StreamExt;

    use super::*;

    pub(crate) const TEST_PRIVATE_KEY: &str =
        include_str!("../../../common/artifact-signing/testdata/test-private-key.pem");

    pub(crate) fn test_store() -> (tempfile::TempDir, Arc<ArtifactStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::builder()
            .config(StorageConfig::FS {
                root: dir.path().to_string_lossy().into_owned(),
            })
            .authority(Arc::new(
                SignatureAuthority::from_private_pem(TEST_PRIVATE_KEY).unwrap(),
            ))
            .build()
            .unwrap();
        (dir, Arc::new(store))
    }

    pub(crate) fn file_count(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    pub(crate) fn draft(version: &str) -> UpdateDraft {
        UpdateDraft {
            version: Some(version.to_string()),
            title: Some(format!("Firmware {version}")),
            security_fixes: vec!["CVE-2026-0001".to_string()],
            severity: Some(UpdateSeverity::High),
            ..Default::default()
        }
    }

    pub(crate) async fn stored(catalog: &UpdateCatalog, content: &'static [u8]) -> StoredArtifact {
        catalog
            .store_artifact(
                futures::stream::iter(vec![Ok::<_, Infallible>(Bytes::from_static(content))]),
                "firmware.bin",
                &CancellationToken::new(),
            )
            .await
            .unwrap()
    }

    pub(crate) fn release_for(update_id: Uuid) -> Release {
        Release {
            id: Uuid::now_v7(),
            update_id,
            release_date: Utc::now(),
            is_active: true,
            is_mandatory: false,
            minimum_version: None,
            max_postpone_days: Release::DEFAULT_MAX_POSTPONE_DAYS,
            release_notes: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_records_signed_artifact() {
        let (_dir, store) = test_store();
        let catalog = UpdateCatalog::new(&Repositories::in_memory(), store.clone());

        let artifact = stored(&catalog, b"Hello, World!").await;
        let update = catalog.publish(draft("2.0.0"), artifact).await.unwrap();

        assert_eq!(
            update.file_hash,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
        assert!(store.authority().verify(&update.file_hash, &update.digital_signature));
        assert_eq!(update.file_size, 13);
        assert!(update.is_security_update);
        assert_eq!(update.update_type, UpdateType::Feature);
        assert!(store.verify_hash(&update.file_path, &update.file_hash).await);
    }

    #[tokio::test]
    async fn test_duplicate_version_purges_artifact() {
        let (dir, store) = test_store();
        let catalog = UpdateCatalog::new(&Repositories::in_memory(), store);

        let first = stored(&catalog, b"one").await;
        catalog.publish(draft("1.0.0"), first).await.unwrap();
        assert_eq!(file_count(&dir), 1);

        let second = stored(&catalog, b"two").await;
        let err = catalog.publish(draft("1.0.0"), second).await.unwrap_err();
        assert!(matches!(err, UpdateServiceError::VersionExists(_)));
        assert_eq!(file_count(&dir), 1);

        assert!(matches!(
            catalog.ensure_version_free("1.0.0").await,
            Err(UpdateServiceError::VersionExists(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_draft_purges_artifact() {
        let (dir, store) = test_store();
        let catalog = UpdateCatalog::new(&Repositories::in_memory(), store);

        let artifact = stored(&catalog, b"bytes").await;
        let mut bad = draft("not-a-version");
        bad.title = None;
        assert!(catalog.publish(bad, artifact).await.is_err());
        assert_eq!(file_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_edit_changes_metadata_only() {
        let (_dir, store) = test_store();
        let catalog = UpdateCatalog::new(&Repositories::in_memory(), store);
        let artifact = stored(&catalog, b"payload").await;
        let original = catalog.publish(draft("3.0.0"), artifact).await.unwrap();

        let edited = catalog
            .edit(
                original.id,
                UpdateMetadataPatch {
                    title: Some("Renamed".into()),
                    severity: Some(UpdateSeverity::Critical),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(edited.title, "Renamed");
        assert_eq!(edited.severity, UpdateSeverity::Critical);
        assert!(!edited.is_active);
        assert_eq!(edited.file_hash, original.file_hash);
        assert_eq!(edited.digital_signature, original.digital_signature);
        assert_eq!(edited.file_path, original.file_path);

        assert!(catalog.list(false).await.unwrap().is_empty());
        assert_eq!(catalog.list(true).await.unwrap().len(), 1);

        let blank = UpdateMetadataPatch {
            title: Some("  ".into()),
            ..Default::default()
        };
        assert!(catalog.edit(original.id, blank).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_refused_while_released() {
        let (dir, store) = test_store();
        let repos = Repositories::in_memory();
        let catalog = UpdateCatalog::new(&repos, store);
        let artifact = stored(&catalog, b"payload").await;
        let update = catalog.publish(draft("4.0.0"), artifact).await.unwrap();
        let release = repos.releases.create(release_for(update.id)).await.unwrap();

        let err = catalog.delete(update.id).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateServiceError::UpdateInUse { releases: 1, .. }
        ));
        assert_eq!(file_count(&dir), 1);

        repos.releases.delete(release.id).await.unwrap();
        catalog.delete(update.id).await.unwrap();
        assert_eq!(file_count(&dir), 0);
        assert!(matches!(
            catalog.get(update.id).await,
            Err(UpdateServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_download_missing_artifact() {
        let (_dir, store) = test_store();
        let catalog = UpdateCatalog::new(&Repositories::in_memory(), store.clone());
        let artifact = stored(&catalog, b"payload").await;
        let update = catalog.publish(draft("5.0.0"), artifact).await.unwrap();

        let (_, reader) = catalog.download(update.id).await.unwrap();
        assert_eq!(reader.size, 7);
        let chunks: Vec<Bytes> = reader.stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.concat(), b"payload");

        store.delete(&update.file_path).await.unwrap();
        assert!(matches!(
            catalog.download(update.id).await,
            Err(UpdateServiceError::ArtifactMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_records_join_release_and_update() {
        let (_dir, store) = test_store();
        let repos = Repositories::in_memory();
        let catalog = UpdateCatalog::new(&repos, store);
        let artifact = stored(&catalog, b"payload").await;
        let update = catalog.publish(draft("6.0.0"), artifact).await.unwrap();

        let active = repos.releases.create(release_for(update.id)).await.unwrap();
        let mut inactive = release_for(update.id);
        inactive.is_active = false;
        repos.releases.create(inactive).await.unwrap();

        let records = catalog.sync_records().await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.release_id, active.id);
        assert_eq!(record.version, "6.0.0");
        assert_eq!(record.severity, "high");
        assert_eq!(record.cve_list.as_deref(), Some("CVE-2026-0001"));
        assert_eq!(record.file_hash, update.file_hash);
        assert_eq!(record.signature, update.digital_signature);
        assert_eq!(record.file_name, "update-6.0.0.bin");

        let metadata = catalog.metadata(update.id).await.unwrap();
        assert_eq!(metadata.file_size_bytes, 7);
        assert_eq!(metadata.signature, update.digital_signature);
    }
}
