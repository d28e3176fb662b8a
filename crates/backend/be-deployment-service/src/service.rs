//! Deployment scheduling and state changes on top of the repositories.

use std::sync::Arc;

use be_remote_db::{
    Deployment, DeploymentRepository, DeploymentStatus, DeviceRepository, ReleaseRepository,
    Repositories, Repository,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    devices::DeviceService,
    error::{DeploymentError, DeploymentResult},
    lifecycle::{self, StatusChange},
    statistics::DeploymentStatistics,
};

/// Shared state for the device and deployment routes.
pub struct AppState {
    pub deployments: DeploymentService,
    pub devices: DeviceService,
}

impl AppState {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            deployments: DeploymentService::new(repos),
            devices: DeviceService::new(repos),
        }
    }
}

/// Why a device was left out of a scheduling batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedDevice {
    pub device_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleReport {
    pub release_id: Uuid,
    pub created: Vec<Deployment>,
    pub skipped: Vec<SkippedDevice>,
}

impl ScheduleReport {
    pub fn created_count(&self) -> usize {
        self.created.len()
    }
}

/// Optional filters for listing deployments. At most one is applied, in the
/// order device, release, status.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DeploymentFilter {
    pub device_id: Option<Uuid>,
    pub release_id: Option<Uuid>,
    pub status: Option<DeploymentStatus>,
}

#[derive(Clone)]
pub struct DeploymentService {
    deployments: Arc<dyn DeploymentRepository>,
    releases: Arc<dyn ReleaseRepository>,
    devices: Arc<dyn DeviceRepository>,
}

impl DeploymentService {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            deployments: repos.deployments.clone(),
            releases: repos.releases.clone(),
            devices: repos.devices.clone(),
        }
    }

    /// Create one pending deployment of `release_id` per device.
    ///
    /// Unknown devices and devices that already have an active deployment of
    /// the release are skipped. An unknown release fails the whole batch.
    #[instrument(skip(self, device_ids), fields(devices = device_ids.len()))]
    pub async fn schedule(
        &self,
        release_id: Uuid,
        device_ids: &[Uuid],
        scheduled_at: Option<DateTime<Utc>>,
    ) -> DeploymentResult<ScheduleReport> {
        if self.releases.get(release_id).await?.is_none() {
            return Err(DeploymentError::not_found("release", release_id));
        }

        let mut report = ScheduleReport {
            release_id,
            created: Vec::new(),
            skipped: Vec::new(),
        };

        for &device_id in device_ids {
            let skip = |reason: &str| SkippedDevice {
                device_id,
                reason: reason.to_string(),
            };

            match self.devices.get(device_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!("Skipping unknown device {}", device_id);
                    report.skipped.push(skip("device not found"));
                    continue;
                }
                Err(e) => {
                    warn!("Failed to load device {}: {}", device_id, e);
                    report.skipped.push(skip("device lookup failed"));
                    continue;
                }
            }

            let deployment = Deployment::new(release_id, device_id, scheduled_at);
            match self.deployments.create_if_idle(deployment).await {
                Ok(Some(created)) => report.created.push(created),
                Ok(None) => {
                    debug!("Device {} already has an active deployment", device_id);
                    report.skipped.push(skip("active deployment exists"));
                }
                Err(e) => {
                    warn!("Failed to create deployment for {}: {}", device_id, e);
                    report.skipped.push(skip("deployment could not be created"));
                }
            }
        }

        info!(
            "Scheduled release {}: {} created, {} skipped",
            release_id,
            report.created.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    pub async fn get(&self, id: Uuid) -> DeploymentResult<Deployment> {
        self.deployments
            .get(id)
            .await?
            .ok_or_else(|| DeploymentError::not_found("deployment", id))
    }

    pub async fn list(&self, filter: &DeploymentFilter) -> DeploymentResult<Vec<Deployment>> {
        let deployments = if let Some(device_id) = filter.device_id {
            self.deployments.list_by_device(device_id).await?
        } else if let Some(release_id) = filter.release_id {
            self.deployments.list_by_release(release_id).await?
        } else if let Some(status) = filter.status {
            self.deployments.list_by_status(status).await?
        } else {
            self.deployments.list().await?
        };
        Ok(deployments)
    }

    /// Active deployments for a device, earliest scheduled first.
    pub async fn pending_for_device(&self, device_id: Uuid) -> DeploymentResult<Vec<Deployment>> {
        let mut pending: Vec<_> = self
            .deployments
            .list_by_device(device_id)
            .await?
            .into_iter()
            .filter(|d| d.status.is_active())
            .collect();
        pending.sort_by_key(|d| d.scheduled_at.unwrap_or(d.created_at));
        Ok(pending)
    }

    #[instrument(skip(self, reason))]
    pub async fn postpone(
        &self,
        id: Uuid,
        until: DateTime<Utc>,
        reason: Option<String>,
    ) -> DeploymentResult<Deployment> {
        let previous = self.get(id).await?;
        let release = self
            .releases
            .get(previous.release_id)
            .await?
            .ok_or_else(|| DeploymentError::not_found("release", previous.release_id))?;

        let mut deployment = previous.clone();
        lifecycle::postpone(&mut deployment, &release, until, reason, Utc::now())?;
        let saved = self.save(&previous, deployment).await?;
        info!(
            "Deployment {} postponed until {} ({} times)",
            saved.id, until, saved.postpone_count
        );
        Ok(saved)
    }

    #[instrument(skip(self, change), fields(status = %change.status))]
    pub async fn update_status(
        &self,
        id: Uuid,
        change: &StatusChange,
    ) -> DeploymentResult<Deployment> {
        let previous = self.get(id).await?;
        let mut deployment = previous.clone();
        lifecycle::apply_status(&mut deployment, change, Utc::now())?;
        let saved = self.save(&previous, deployment).await?;
        if saved.status == DeploymentStatus::Failed {
            warn!(
                "Deployment {} failed (attempt {}): {}",
                saved.id,
                saved.retry_count,
                saved.error_message.as_deref().unwrap_or("no error message")
            );
        } else if previous.status != saved.status {
            debug!(
                "Deployment {} {} -> {}",
                saved.id, previous.status, saved.status
            );
        }
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> DeploymentResult<Deployment> {
        let previous = self.get(id).await?;
        let mut deployment = previous.clone();
        lifecycle::cancel(&mut deployment)?;
        let saved = self.save(&previous, deployment).await?;
        info!("Deployment {} cancelled", saved.id);
        Ok(saved)
    }

    /// Write `next` unless the deployment moved on since `previous` was read.
    async fn save(&self, previous: &Deployment, next: Deployment) -> DeploymentResult<Deployment> {
        let id = next.id;
        self.deployments
            .update_if_unchanged(previous, next)
            .await?
            .ok_or(DeploymentError::ConcurrentUpdate(id))
    }

    /// Counts over every deployment, or over one release's deployments.
    pub async fn statistics(
        &self,
        release_id: Option<Uuid>,
    ) -> DeploymentResult<DeploymentStatistics> {
        let deployments = match release_id {
            Some(release_id) => self.deployments.list_by_release(release_id).await?,
            None => self.deployments.list().await?,
        };
        Ok(DeploymentStatistics::from_deployments(&deployments))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use be_remote_db::{Device, Release, Update, UpdateSeverity, UpdateType};
    use chrono::Duration;

    pub(crate) async fn seed_release(repos: &Repositories, is_mandatory: bool) -> Release {
        let now = Utc::now();
        let update = repos
            .updates
            .create(Update {
                id: Uuid::now_v7(),
                version: format!("1.0.0+{}", Uuid::now_v7().simple()),
                title: "Firmware".into(),
                description: None,
                changelog: None,
                security_fixes: vec![],
                file_path: "a.bin".into(),
                file_hash: "00".into(),
                digital_signature: "c2ln".into(),
                file_size: 1,
                update_type: UpdateType::Feature,
                severity: UpdateSeverity::Medium,
                is_security_update: false,
                target_device_types: vec![],
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        repos
            .releases
            .create(Release {
                id: Uuid::now_v7(),
                update_id: update.id,
                release_date: now,
                is_active: true,
                is_mandatory,
                minimum_version: None,
                max_postpone_days: Release::DEFAULT_MAX_POSTPONE_DAYS,
                release_notes: None,
                created_at: now,
            })
            .await
            .unwrap()
    }

    pub(crate) async fn seed_device(repos: &Repositories, identifier: &str) -> Device {
        repos
            .devices
            .create(Device::new(identifier, identifier, "gateway"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_schedule_skips_unknown_and_busy_devices() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        let release = seed_release(&repos, false).await;
        let a = seed_device(&repos, "dev-a").await;
        let b = seed_device(&repos, "dev-b").await;
        let ghost = Uuid::now_v7();

        let first = service
            .schedule(release.id, &[a.id, ghost], None)
            .await
            .unwrap();
        assert_eq!(first.created_count(), 1);
        assert_eq!(
            first.skipped,
            vec![SkippedDevice {
                device_id: ghost,
                reason: "device not found".into()
            }]
        );

        let second = service
            .schedule(release.id, &[a.id, b.id], None)
            .await
            .unwrap();
        assert_eq!(second.created_count(), 1);
        assert_eq!(second.created[0].device_id, b.id);
        assert_eq!(second.skipped[0].device_id, a.id);
        assert_eq!(second.skipped[0].reason, "active deployment exists");
    }

    #[tokio::test]
    async fn test_schedule_mandatory_release_skips_missing_device() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        let release = seed_release(&repos, true).await;
        let a = seed_device(&repos, "dev-a").await;
        let b = seed_device(&repos, "dev-b").await;
        let missing = Uuid::now_v7();

        let report = service
            .schedule(release.id, &[a.id, missing, b.id], None)
            .await
            .unwrap();

        assert_eq!(report.created_count(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].device_id, missing);
        for deployment in &report.created {
            assert_eq!(deployment.status, DeploymentStatus::Pending);
            assert_eq!(deployment.release_id, release.id);
            let scheduled = repos
                .releases
                .get(deployment.release_id)
                .await
                .unwrap()
                .unwrap();
            assert!(scheduled.is_mandatory);
        }
        let devices: Vec<_> = report.created.iter().map(|d| d.device_id).collect();
        assert_eq!(devices, vec![a.id, b.id]);

        let err = service
            .postpone(report.created[0].id, Utc::now() + Duration::days(30), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DeploymentError::PostponeLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_schedule_all_skipped_is_not_an_error() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        let release = seed_release(&repos, false).await;

        let report = service
            .schedule(release.id, &[Uuid::now_v7(), Uuid::now_v7()], None)
            .await
            .unwrap();
        assert_eq!(report.created_count(), 0);
        assert_eq!(report.skipped.len(), 2);
    }

    #[tokio::test]
    async fn test_schedule_unknown_release() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        let device = seed_device(&repos, "dev-a").await;

        let err = service
            .schedule(Uuid::now_v7(), &[device.id], None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_reschedule_after_completion() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        let release = seed_release(&repos, false).await;
        let device = seed_device(&repos, "dev-a").await;

        let report = service
            .schedule(release.id, &[device.id], None)
            .await
            .unwrap();
        let id = report.created[0].id;
        for status in [
            DeploymentStatus::Downloading,
            DeploymentStatus::Installing,
            DeploymentStatus::Completed,
        ] {
            service
                .update_status(id, &StatusChange::to(status))
                .await
                .unwrap();
        }

        let again = service
            .schedule(release.id, &[device.id], None)
            .await
            .unwrap();
        assert_eq!(again.created_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_schedules_create_one_deployment() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        let release = seed_release(&repos, false).await;
        let device = seed_device(&repos, "dev-a").await;
        let (release_id, device_id) = (release.id, device.id);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .schedule(release_id, &[device_id], None)
                    .await
                    .unwrap()
                    .created_count()
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 1);
        assert_eq!(
            service
                .list(&DeploymentFilter {
                    device_id: Some(device_id),
                    ..Default::default()
                })
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_postpone_respects_mandatory_window() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        let release = seed_release(&repos, true).await;
        let device = seed_device(&repos, "dev-a").await;
        let id = service
            .schedule(release.id, &[device.id], None)
            .await
            .unwrap()
            .created[0]
            .id;

        let err = service
            .postpone(id, Utc::now() + Duration::days(10), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeploymentError::PostponeLimitExceeded { max_days: 7, .. }
        ));

        let saved = service
            .postpone(id, Utc::now() + Duration::days(3), Some("busy".into()))
            .await
            .unwrap();
        assert_eq!(saved.status, DeploymentStatus::Postponed);
        assert_eq!(service.get(id).await.unwrap().postpone_count, 1);
    }

    #[tokio::test]
    async fn test_failed_status_persists_retry_bookkeeping() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        let release = seed_release(&repos, false).await;
        let device = seed_device(&repos, "dev-a").await;
        let id = service
            .schedule(release.id, &[device.id], None)
            .await
            .unwrap()
            .created[0]
            .id;

        service
            .update_status(id, &StatusChange::to(DeploymentStatus::Downloading))
            .await
            .unwrap();
        service
            .update_status(id, &StatusChange::to(DeploymentStatus::Failed))
            .await
            .unwrap();

        let stored = service.get(id).await.unwrap();
        assert_eq!(stored.retry_count, 1);
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failure_reports_count_one_retry() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        let release = seed_release(&repos, false).await;
        let device = seed_device(&repos, "dev-a").await;
        let id = service
            .schedule(release.id, &[device.id], None)
            .await
            .unwrap()
            .created[0]
            .id;
        service
            .update_status(id, &StatusChange::to(DeploymentStatus::Downloading))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .update_status(id, &StatusChange::to(DeploymentStatus::Failed))
                        .await
                })
            })
            .collect();

        let mut accepted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(
                    DeploymentError::ConcurrentUpdate(_)
                    | DeploymentError::InvalidTransition { .. },
                ) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(service.get(id).await.unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_not_written() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        let release = seed_release(&repos, false).await;
        let device = seed_device(&repos, "dev-a").await;
        let id = service
            .schedule(release.id, &[device.id], None)
            .await
            .unwrap()
            .created[0]
            .id;

        let snapshot = service.get(id).await.unwrap();
        service
            .update_status(id, &StatusChange::to(DeploymentStatus::Failed))
            .await
            .unwrap();

        let mut stale = snapshot.clone();
        lifecycle::cancel(&mut stale).unwrap();
        assert!(matches!(
            service.save(&snapshot, stale).await,
            Err(DeploymentError::ConcurrentUpdate(stale_id)) if stale_id == id
        ));
        let stored = service.get(id).await.unwrap();
        assert_eq!(stored.status, DeploymentStatus::Failed);
        assert_eq!(stored.retry_count, 1);
    }

    #[tokio::test]
    async fn test_cancel_and_statistics() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        let release = seed_release(&repos, false).await;
        let a = seed_device(&repos, "dev-a").await;
        let b = seed_device(&repos, "dev-b").await;
        let report = service
            .schedule(release.id, &[a.id, b.id], None)
            .await
            .unwrap();

        service.cancel(report.created[0].id).await.unwrap();
        let done = report.created[1].id;
        for status in [
            DeploymentStatus::Downloading,
            DeploymentStatus::Installing,
            DeploymentStatus::Completed,
        ] {
            service
                .update_status(done, &StatusChange::to(status))
                .await
                .unwrap();
        }
        assert!(matches!(
            service.cancel(done).await,
            Err(DeploymentError::CancelNotAllowed { .. })
        ));

        let stats = service.statistics(Some(release.id)).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.completed, 1);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);

        let empty = service.statistics(Some(Uuid::now_v7())).await.unwrap();
        assert_eq!(empty.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_pending_for_device_ordered_by_schedule() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        let first = seed_release(&repos, false).await;
        let second = seed_release(&repos, false).await;
        let device = seed_device(&repos, "dev-a").await;
        let now = Utc::now();

        service
            .schedule(second.id, &[device.id], Some(now + Duration::hours(2)))
            .await
            .unwrap();
        service
            .schedule(first.id, &[device.id], Some(now + Duration::hours(1)))
            .await
            .unwrap();

        let pending = service.pending_for_device(device.id).await.unwrap();
        let releases: Vec<_> = pending.iter().map(|d| d.release_id).collect();
        assert_eq!(releases, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_missing_deployment() {
        let repos = Repositories::in_memory();
        let service = DeploymentService::new(&repos);
        assert!(service.get(Uuid::now_v7()).await.unwrap_err().is_not_found());
        assert!(
            service
                .cancel(Uuid::now_v7())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}
