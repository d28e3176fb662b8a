use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use be_remote_db::{DbError, DeploymentStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Cannot move deployment from {from} to {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error(
        "Mandatory release allows postponing for at most {max_days} days (until {deadline}), requested {requested}"
    )]
    PostponeLimitExceeded {
        max_days: i32,
        deadline: DateTime<Utc>,
        requested: DateTime<Utc>,
    },

    #[error("Cannot postpone a {status} deployment")]
    PostponeNotAllowed { status: DeploymentStatus },

    #[error("Cannot cancel a {status} deployment")]
    CancelNotAllowed { status: DeploymentStatus },

    #[error("Progress must be between 0 and 100, got {0}")]
    InvalidProgress(i32),

    #[error("Device '{0}' is already registered")]
    DeviceExists(String),

    #[error("Deployment {0} was changed by another request")]
    ConcurrentUpdate(Uuid),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl DeploymentError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type DeploymentResult<T> = std::result::Result<T, DeploymentError>;

impl IntoResponse for DeploymentError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            DeploymentError::NotFound { entity, id } => {
                warn!("{} {} not found", entity, id);
                (
                    StatusCode::NOT_FOUND,
                    "not_found",
                    "Resource not found",
                    Some(self.to_string()),
                )
            }
            DeploymentError::InvalidTransition { from, to } => {
                warn!("Rejected deployment transition {} -> {}", from, to);
                (
                    StatusCode::CONFLICT,
                    "invalid_transition",
                    "Deployment cannot change to the requested status",
                    Some(self.to_string()),
                )
            }
            DeploymentError::PostponeLimitExceeded { max_days, .. } => {
                warn!("Postpone beyond {} day limit rejected", max_days);
                (
                    StatusCode::BAD_REQUEST,
                    "postpone_limit_exceeded",
                    "Postponement exceeds the release limit",
                    Some(self.to_string()),
                )
            }
            DeploymentError::PostponeNotAllowed { status } => {
                warn!("Postpone of {} deployment rejected", status);
                (
                    StatusCode::BAD_REQUEST,
                    "postpone_not_allowed",
                    "Deployment cannot be postponed",
                    Some(self.to_string()),
                )
            }
            DeploymentError::CancelNotAllowed { status } => {
                warn!("Cancel of {} deployment rejected", status);
                (
                    StatusCode::BAD_REQUEST,
                    "cancel_not_allowed",
                    "Deployment cannot be cancelled",
                    Some(self.to_string()),
                )
            }
            DeploymentError::InvalidProgress(_) | DeploymentError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "Invalid request",
                Some(self.to_string()),
            ),
            DeploymentError::ConcurrentUpdate(id) => {
                warn!("Concurrent change to deployment {}", id);
                (
                    StatusCode::CONFLICT,
                    "concurrent_update",
                    "Deployment changed concurrently, retry the request",
                    Some(self.to_string()),
                )
            }
            DeploymentError::DeviceExists(identifier) => {
                warn!("Duplicate device registration: {}", identifier);
                (
                    StatusCode::CONFLICT,
                    "device_exists",
                    "Device already registered",
                    Some(self.to_string()),
                )
            }
            DeploymentError::Database(e) if e.is_duplicate() => {
                warn!("Conflicting write: {}", e);
                (
                    StatusCode::CONFLICT,
                    "conflict",
                    "Conflicting deployment state",
                    None,
                )
            }
            DeploymentError::Database(e) => {
                error!("Database operation failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                    None,
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: error_code.to_owned(),
                message: message.to_owned(),
                details,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (
                DeploymentError::not_found("deployment", Uuid::now_v7()),
                StatusCode::NOT_FOUND,
            ),
            (
                DeploymentError::CancelNotAllowed {
                    status: DeploymentStatus::Completed,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                DeploymentError::DeviceExists("dev-1".into()),
                StatusCode::CONFLICT,
            ),
            (
                DeploymentError::ConcurrentUpdate(Uuid::now_v7()),
                StatusCode::CONFLICT,
            ),
            (
                DeploymentError::Database(DbError::connection("down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_postpone_limit_message_carries_limits() {
        let deadline = "2026-01-08T00:00:00Z".parse().unwrap();
        let requested = "2026-01-09T00:00:00Z".parse().unwrap();
        let err = DeploymentError::PostponeLimitExceeded {
            max_days: 7,
            deadline,
            requested,
        };
        let message = err.to_string();
        assert!(message.contains("7 days"));
        assert!(message.contains("2026-01-08"));
    }
}
