//! Deployment state machine.
//!
//! ```text
//! Pending ──► Downloading ──► Installing ──► Completed
//!    │             │               │
//!    ├─────────────┴───────────────┴──► Failed ──► Pending | Downloading (retry)
//!    └─────────────┴───────────────┴──► Postponed ──► Pending | Downloading
//! any non-terminal state ──► Cancelled
//! ```
//!
//! Completed and Cancelled are terminal. Every mutation below goes through
//! [`validate_transition`].

use be_remote_db::{Deployment, DeploymentStatus, Release};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::{DeploymentError, DeploymentResult};

use DeploymentStatus::*;

/// Check that `from -> to` is an edge of the state machine. Staying in an
/// in-flight state is allowed so progress can be reported.
pub fn validate_transition(from: DeploymentStatus, to: DeploymentStatus) -> DeploymentResult<()> {
    let allowed = match (from, to) {
        (Completed | Cancelled, _) => false,
        (Pending | Downloading | Installing, Cancelled | Failed | Postponed) => true,
        (Postponed | Failed, Cancelled) => true,
        (Pending, Pending | Downloading) => true,
        (Downloading, Downloading | Installing) => true,
        (Installing, Installing | Completed) => true,
        (Postponed, Pending | Downloading | Postponed) => true,
        (Failed, Pending | Downloading) => true,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(DeploymentError::InvalidTransition { from, to })
    }
}

/// A status report from a device or operator.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusChange {
    pub status: DeploymentStatus,
    pub error_message: Option<String>,
    pub download_progress: Option<i32>,
    pub install_progress: Option<i32>,
}

impl StatusChange {
    pub fn to(status: DeploymentStatus) -> Self {
        Self {
            status,
            error_message: None,
            download_progress: None,
            install_progress: None,
        }
    }
}

fn check_progress(value: Option<i32>) -> DeploymentResult<()> {
    match value {
        Some(p) if !(0..=100).contains(&p) => Err(DeploymentError::InvalidProgress(p)),
        _ => Ok(()),
    }
}

/// Apply a status report, maintaining timestamps and retry bookkeeping.
pub fn apply_status(
    deployment: &mut Deployment,
    change: &StatusChange,
    now: DateTime<Utc>,
) -> DeploymentResult<()> {
    if change.status == Postponed {
        return Err(DeploymentError::validation(
            "use the postpone operation to postpone a deployment",
        ));
    }
    check_progress(change.download_progress)?;
    check_progress(change.install_progress)?;
    validate_transition(deployment.status, change.status)?;

    let previous = deployment.status;
    match change.status {
        Downloading => {
            if deployment.started_at.is_none() {
                deployment.started_at = Some(now);
            }
        }
        Completed => deployment.completed_at = Some(now),
        Failed => {
            deployment.completed_at = Some(now);
            deployment.retry_count += 1;
            deployment.last_retry_at = Some(now);
        }
        _ => {}
    }

    if previous == Failed && change.status != Cancelled {
        deployment.completed_at = None;
    }

    deployment.status = change.status;

    if let Some(message) = &change.error_message {
        deployment.error_message = Some(message.clone());
    }
    if let Some(progress) = change.download_progress {
        deployment.download_progress = Some(progress);
    }
    if let Some(progress) = change.install_progress {
        deployment.install_progress = Some(progress);
    }

    Ok(())
}

/// Latest allowed postponement target for a mandatory release.
pub fn postpone_deadline(deployment: &Deployment, release: &Release) -> DateTime<Utc> {
    deployment.created_at + Duration::days(i64::from(release.max_postpone_days))
}

/// Postpone a deployment until `until`.
///
/// Mandatory releases bound `until` by `created_at + max_postpone_days`.
pub fn postpone(
    deployment: &mut Deployment,
    release: &Release,
    until: DateTime<Utc>,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> DeploymentResult<()> {
    if matches!(deployment.status, Completed | Failed | Cancelled) {
        return Err(DeploymentError::PostponeNotAllowed {
            status: deployment.status,
        });
    }
    if release.is_mandatory {
        let deadline = postpone_deadline(deployment, release);
        if until > deadline {
            return Err(DeploymentError::PostponeLimitExceeded {
                max_days: release.max_postpone_days,
                deadline,
                requested: until,
            });
        }
    }
    validate_transition(deployment.status, Postponed)?;

    deployment.status = Postponed;
    deployment.scheduled_at = Some(until);
    deployment.postpone_reason = reason;
    deployment.postpone_count += 1;
    deployment.last_postponed_at = Some(now);

    Ok(())
}

pub fn cancel(deployment: &mut Deployment) -> DeploymentResult<()> {
    if matches!(deployment.status, Completed | Cancelled) {
        return Err(DeploymentError::CancelNotAllowed {
            status: deployment.status,
        });
    }
    validate_transition(deployment.status, Cancelled)?;
    deployment.status = Cancelled;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn deployment_created_at(created_at: DateTime<Utc>) -> Deployment {
        let mut deployment = Deployment::new(Uuid::now_v7(), Uuid::now_v7(), None);
        deployment.created_at = created_at;
        deployment
    }

    fn release(is_mandatory: bool, max_postpone_days: i32) -> Release {
        Release {
            id: Uuid::now_v7(),
            update_id: Uuid::now_v7(),
            release_date: Utc::now(),
            is_active: true,
            is_mandatory,
            minimum_version: None,
            max_postpone_days,
            release_notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(validate_transition(Pending, Downloading).is_ok());
        assert!(validate_transition(Downloading, Installing).is_ok());
        assert!(validate_transition(Installing, Completed).is_ok());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for to in DeploymentStatus::ALL {
            assert!(validate_transition(Completed, to).is_err());
            assert!(validate_transition(Cancelled, to).is_err());
        }
    }

    #[test]
    fn test_no_skipping_ahead() {
        assert!(validate_transition(Pending, Completed).is_err());
        assert!(validate_transition(Pending, Installing).is_err());
        assert!(validate_transition(Downloading, Completed).is_err());
        assert!(validate_transition(Installing, Downloading).is_err());
    }

    #[test]
    fn test_retry_and_resume() {
        assert!(validate_transition(Failed, Pending).is_ok());
        assert!(validate_transition(Failed, Downloading).is_ok());
        assert!(validate_transition(Postponed, Pending).is_ok());
        assert!(validate_transition(Postponed, Downloading).is_ok());
        assert!(validate_transition(Failed, Completed).is_err());
    }

    #[test]
    fn test_started_at_set_once() {
        let now = Utc::now();
        let mut deployment = deployment_created_at(now);

        apply_status(&mut deployment, &StatusChange::to(Downloading), now).unwrap();
        assert_eq!(deployment.started_at, Some(now));

        let later = now + Duration::minutes(5);
        apply_status(&mut deployment, &StatusChange::to(Failed), later).unwrap();
        apply_status(&mut deployment, &StatusChange::to(Downloading), later).unwrap();
        assert_eq!(deployment.started_at, Some(now));
    }

    #[test]
    fn test_failure_increments_retry_count_once() {
        let now = Utc::now();
        let mut deployment = deployment_created_at(now);
        apply_status(&mut deployment, &StatusChange::to(Downloading), now).unwrap();

        let change = StatusChange {
            error_message: Some("checksum mismatch".into()),
            ..StatusChange::to(Failed)
        };
        apply_status(&mut deployment, &change, now).unwrap();

        assert_eq!(deployment.status, Failed);
        assert_eq!(deployment.retry_count, 1);
        assert_eq!(deployment.last_retry_at, Some(now));
        assert_eq!(deployment.completed_at, Some(now));
        assert_eq!(deployment.error_message.as_deref(), Some("checksum mismatch"));
    }

    #[test]
    fn test_completion_sets_completed_at() {
        let now = Utc::now();
        let mut deployment = deployment_created_at(now);
        for status in [Downloading, Installing, Completed] {
            apply_status(&mut deployment, &StatusChange::to(status), now).unwrap();
        }
        assert_eq!(deployment.completed_at, Some(now));
        assert_eq!(deployment.retry_count, 0);
    }

    #[test]
    fn test_retry_clears_completed_at() {
        let now = Utc::now();
        let mut deployment = deployment_created_at(now);
        apply_status(&mut deployment, &StatusChange::to(Failed), now).unwrap();
        apply_status(&mut deployment, &StatusChange::to(Pending), now).unwrap();
        assert!(deployment.completed_at.is_none());
        assert_eq!(deployment.retry_count, 1);
    }

    #[test]
    fn test_progress_bounds() {
        let now = Utc::now();
        let mut deployment = deployment_created_at(now);

        let change = StatusChange {
            download_progress: Some(45),
            ..StatusChange::to(Downloading)
        };
        apply_status(&mut deployment, &change, now).unwrap();
        assert_eq!(deployment.download_progress, Some(45));
        assert_eq!(deployment.install_progress, None);

        let bad = StatusChange {
            download_progress: Some(101),
            ..StatusChange::to(Downloading)
        };
        assert!(matches!(
            apply_status(&mut deployment, &bad, now),
            Err(DeploymentError::InvalidProgress(101))
        ));
        let negative = StatusChange {
            install_progress: Some(-1),
            ..StatusChange::to(Downloading)
        };
        assert!(apply_status(&mut deployment, &negative, now).is_err());
        assert_eq!(deployment.download_progress, Some(45));
    }

    #[test]
    fn test_rejected_change_leaves_deployment_untouched() {
        let now = Utc::now();
        let mut deployment = deployment_created_at(now);
        let before = deployment.clone();
        assert!(apply_status(&mut deployment, &StatusChange::to(Completed), now).is_err());
        assert_eq!(deployment, before);
    }

    #[test]
    fn test_mandatory_postpone_window_boundaries() {
        let created = Utc::now();
        let now = created + Duration::hours(1);
        let release = release(true, 7);

        let mut at_limit = deployment_created_at(created);
        postpone(&mut at_limit, &release, created + Duration::days(7), None, now).unwrap();

        let mut just_inside = deployment_created_at(created);
        postpone(
            &mut just_inside,
            &release,
            created + Duration::days(6) + Duration::hours(23) + Duration::minutes(59),
            None,
            now,
        )
        .unwrap();

        let mut beyond = deployment_created_at(created);
        let err = postpone(&mut beyond, &release, created + Duration::days(8), None, now)
            .unwrap_err();
        match err {
            DeploymentError::PostponeLimitExceeded {
                max_days, deadline, ..
            } => {
                assert_eq!(max_days, 7);
                assert_eq!(deadline, created + Duration::days(7));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(beyond.status, Pending);
        assert_eq!(beyond.postpone_count, 0);
    }

    #[test]
    fn test_optional_release_postpone_unbounded() {
        let created = Utc::now();
        let mut deployment = deployment_created_at(created);
        postpone(
            &mut deployment,
            &release(false, 7),
            created + Duration::days(90),
            None,
            created,
        )
        .unwrap();
        assert_eq!(deployment.status, Postponed);
    }

    #[test]
    fn test_postpone_records_bookkeeping() {
        let now = Utc::now();
        let until = now + Duration::days(2);
        let mut deployment = deployment_created_at(now);

        postpone(
            &mut deployment,
            &release(true, 7),
            until,
            Some("production freeze".into()),
            now,
        )
        .unwrap();

        assert_eq!(deployment.status, Postponed);
        assert_eq!(deployment.scheduled_at, Some(until));
        assert_eq!(deployment.postpone_count, 1);
        assert_eq!(deployment.last_postponed_at, Some(now));
        assert_eq!(
            deployment.postpone_reason.as_deref(),
            Some("production freeze")
        );

        postpone(&mut deployment, &release(true, 7), until, None, now).unwrap();
        assert_eq!(deployment.postpone_count, 2);
    }

    #[test]
    fn test_cannot_postpone_finished_deployments() {
        let now = Utc::now();
        for status in [Completed, Failed, Cancelled] {
            let mut deployment = deployment_created_at(now);
            deployment.status = status;
            assert!(matches!(
                postpone(
                    &mut deployment,
                    &release(false, 7),
                    now + Duration::days(1),
                    None,
                    now
                ),
                Err(DeploymentError::PostponeNotAllowed { .. })
            ));
        }
    }

    #[test]
    fn test_postpone_target_only_bounded_by_window() {
        let created = Utc::now() - Duration::days(10);
        let now = Utc::now();
        let until = created + Duration::days(2);

        let mut deployment = deployment_created_at(created);
        postpone(&mut deployment, &release(true, 7), until, None, now).unwrap();
        assert_eq!(deployment.status, Postponed);
        assert_eq!(deployment.scheduled_at, Some(until));

        let mut optional = deployment_created_at(now);
        postpone(
            &mut optional,
            &release(false, 7),
            now - Duration::minutes(1),
            None,
            now,
        )
        .unwrap();
        assert_eq!(optional.postpone_count, 1);
    }

    #[test]
    fn test_cancel() {
        for status in [Pending, Downloading, Installing, Postponed, Failed] {
            let mut deployment = deployment_created_at(Utc::now());
            deployment.status = status;
            cancel(&mut deployment).unwrap();
            assert_eq!(deployment.status, Cancelled);
        }

        let mut done = deployment_created_at(Utc::now());
        done.status = Completed;
        assert!(matches!(
            cancel(&mut done),
            Err(DeploymentError::CancelNotAllowed {
                status: Completed
            })
        ));
    }

    #[test]
    fn test_status_endpoint_cannot_postpone() {
        let now = Utc::now();
        let mut deployment = deployment_created_at(now);
        assert!(matches!(
            apply_status(&mut deployment, &StatusChange::to(Postponed), now),
            Err(DeploymentError::Validation(_))
        ));
    }
}
