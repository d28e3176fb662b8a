use be_remote_db::{Deployment, DeploymentStatus};
use serde::Serialize;

/// Aggregate view over a set of deployments.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DeploymentStatistics {
    pub total: usize,
    pub pending: usize,
    pub downloading: usize,
    pub installing: usize,
    pub completed: usize,
    pub failed: usize,
    pub postponed: usize,
    pub cancelled: usize,
    /// `completed / total`, or 0 when there are no deployments.
    pub success_rate: f64,
}

impl DeploymentStatistics {
    pub fn from_deployments<'a>(deployments: impl IntoIterator<Item = &'a Deployment>) -> Self {
        let mut stats = Self::default();
        for deployment in deployments {
            stats.total += 1;
            match deployment.status {
                DeploymentStatus::Pending => stats.pending += 1,
                DeploymentStatus::Downloading => stats.downloading += 1,
                DeploymentStatus::Installing => stats.installing += 1,
                DeploymentStatus::Completed => stats.completed += 1,
                DeploymentStatus::Failed => stats.failed += 1,
                DeploymentStatus::Postponed => stats.postponed += 1,
                DeploymentStatus::Cancelled => stats.cancelled += 1,
            }
        }
        if stats.total > 0 {
            stats.success_rate = stats.completed as f64 / stats.total as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn with_status(status: DeploymentStatus) -> Deployment {
        let mut deployment = Deployment::new(Uuid::now_v7(), Uuid::now_v7(), None);
        deployment.status = status;
        deployment
    }

    #[test]
    fn test_empty_set() {
        let stats = DeploymentStatistics::from_deployments(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn test_counts_and_rate() {
        let deployments: Vec<_> = [
            DeploymentStatus::Completed,
            DeploymentStatus::Completed,
            DeploymentStatus::Completed,
            DeploymentStatus::Failed,
            DeploymentStatus::Pending,
            DeploymentStatus::Postponed,
            DeploymentStatus::Cancelled,
            DeploymentStatus::Installing,
        ]
        .into_iter()
        .map(with_status)
        .collect();

        let stats = DeploymentStatistics::from_deployments(&deployments);
        assert_eq!(stats.total, 8);
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.postponed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.installing, 1);
        assert_eq!(stats.downloading, 0);
        assert!((stats.success_rate - 0.375).abs() < f64::EPSILON);
    }

    #[test]
    fn test_all_completed() {
        let deployments = vec![with_status(DeploymentStatus::Completed); 4];
        let stats = DeploymentStatistics::from_deployments(&deployments);
        assert_eq!(stats.success_rate, 1.0);
    }
}
