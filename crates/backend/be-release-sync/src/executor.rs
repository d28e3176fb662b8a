//! One synchronization pass: pull active releases from the authority and
//! cache any the portal has not seen yet.

use std::sync::Arc;

use be_remote_db::{
    Release, ReleaseRepository, Repositories, Repository, Update, UpdateRepository,
    UpdateSeverity, UpdateType,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use update_models::{ReleaseSyncRecord, split_cve_list};

use crate::{
    error::{SyncError, SyncResult},
    source::ReleaseSource,
};

pub const ALREADY_RUNNING: &str = "Sync already in progress";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub success: bool,
    pub new_releases: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    pub fn succeeded(new_releases: usize) -> Self {
        Self {
            success: true,
            new_releases,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            new_releases: 0,
            error: Some(error.into()),
        }
    }

    fn already_running() -> Self {
        Self {
            success: true,
            new_releases: 0,
            error: Some(ALREADY_RUNNING.to_string()),
        }
    }
}

pub struct SyncExecutor {
    source: Option<Arc<dyn ReleaseSource>>,
    updates: Arc<dyn UpdateRepository>,
    releases: Arc<dyn ReleaseRepository>,
    running: Semaphore,
}

impl SyncExecutor {
    /// `source` is `None` when no authority is configured; every run then
    /// reports failure without touching the cache.
    pub fn new(source: Option<Arc<dyn ReleaseSource>>, repos: &Repositories) -> Self {
        Self {
            source,
            updates: repos.updates.clone(),
            releases: repos.releases.clone(),
            running: Semaphore::new(1),
        }
    }

    /// Run one pass. A pass started while another is in flight returns
    /// immediately. Cancellation stops the pass between records.
    #[instrument(skip_all)]
    pub async fn run(&self, cancel: &CancellationToken) -> SyncReport {
        let Some(source) = &self.source else {
            warn!("Authority API URL not configured, skipping sync");
            return SyncReport::failed(SyncError::AuthorityNotConfigured.to_string());
        };

        let Ok(_permit) = self.running.try_acquire() else {
            info!("{}, skipping this request", ALREADY_RUNNING);
            return SyncReport::already_running();
        };

        match self.sync_from(source.as_ref(), cancel).await {
            Ok(new_releases) => {
                info!(
                    "Release sync completed, {} new releases cached",
                    new_releases
                );
                SyncReport::succeeded(new_releases)
            }
            Err(SyncError::Cancelled) => SyncReport::failed(SyncError::Cancelled.to_string()),
            Err(e) => {
                error!("Release sync failed: {}", e);
                SyncReport::failed(e.to_string())
            }
        }
    }

    async fn sync_from(
        &self,
        source: &dyn ReleaseSource,
        cancel: &CancellationToken,
    ) -> SyncResult<usize> {
        let records = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Release sync cancelled before fetching");
                return Err(SyncError::Cancelled);
            }
            records = source.fetch_active_releases() => records?,
        };
        if records.is_empty() {
            info!("No active releases to sync");
            return Ok(0);
        }

        let mut created = 0;
        for record in &records {
            if cancel.is_cancelled() {
                info!(
                    "Release sync cancelled after caching {} of {} releases",
                    created,
                    records.len()
                );
                return Err(SyncError::Cancelled);
            }
            match self.sync_record(record).await {
                Ok(true) => created += 1,
                Ok(false) => debug!("Release {} already cached", record.release_id),
                Err(e) => error!("Error syncing release {}: {}", record.release_id, e),
            }
        }
        Ok(created)
    }

    /// Cache the update, then the release. Returns whether the release is new.
    async fn sync_record(&self, record: &ReleaseSyncRecord) -> SyncResult<bool> {
        if self.updates.get(record.update_id).await?.is_none() {
            let update = update_from_record(record)?;
            self.updates.create(update).await?;
            info!(
                "Cached update {} - version {}",
                record.update_id, record.version
            );
        }

        if self.releases.get(record.release_id).await?.is_some() {
            return Ok(false);
        }

        self.releases.create(release_from_record(record)).await?;
        info!(
            "Cached release {} - version {} - severity {}",
            record.release_id, record.version, record.severity
        );
        Ok(true)
    }
}

fn update_from_record(record: &ReleaseSyncRecord) -> SyncResult<Update> {
    let severity: UpdateSeverity = record
        .severity
        .parse()
        .map_err(|reason: String| SyncError::invalid_record(record.release_id, reason))?;
    let security_fixes = record
        .cve_list
        .as_deref()
        .map(split_cve_list)
        .unwrap_or_default();
    let now = Utc::now();

    Ok(Update {
        id: record.update_id,
        version: record.version.clone(),
        title: format!("Update {}", record.version),
        description: record.changelog.clone(),
        changelog: record.changelog.clone(),
        is_security_update: !security_fixes.is_empty(),
        security_fixes,
        file_path: record.file_name.clone(),
        file_hash: record.file_hash.clone(),
        digital_signature: record.signature.clone(),
        file_size: record.file_size_bytes,
        update_type: UpdateType::Feature,
        severity,
        target_device_types: Vec::new(),
        is_active: true,
        created_at: now,
        updated_at: now,
    })
}

fn release_from_record(record: &ReleaseSyncRecord) -> Release {
    Release {
        id: record.release_id,
        update_id: record.update_id,
        release_date: record.release_date,
        is_active: true,
        is_mandatory: record.is_mandatory,
        minimum_version: None,
        max_postpone_days: record.max_postpone_days,
        release_notes: record.changelog.clone(),
        created_at: Utc::now(),
    }
}
