use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use be_remote_db::DbError;
use serde::Serialize;
use tracing::{error, warn};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authority API URL not configured")]
    AuthorityNotConfigured,

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authority responded with status {0}")]
    UnexpectedStatus(u16),

    #[error("Invalid release record {release_id}: {reason}")]
    InvalidRecord { release_id: String, reason: String },

    #[error("Webhook secret not configured")]
    WebhookSecretMissing,

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Missing or invalid device API key")]
    Unauthorized,

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl SyncError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_record(release_id: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            release_id: release_id.to_string(),
            reason: reason.into(),
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            SyncError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Unauthorized",
                None,
            ),
            SyncError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Unauthorized",
                None,
            ),
            SyncError::WebhookSecretMissing => {
                error!("Webhook received but no webhook secret is configured");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "webhook_not_configured",
                    "Webhook not configured",
                    None,
                )
            }
            SyncError::InvalidPayload(e) => {
                warn!("Rejected malformed payload: {}", e);
                (
                    StatusCode::BAD_REQUEST,
                    "invalid_payload",
                    "Invalid payload",
                    Some(e.to_string()),
                )
            }
            SyncError::AuthorityNotConfigured
            | SyncError::Http(_)
            | SyncError::UnexpectedStatus(_)
            | SyncError::InvalidRecord { .. } => {
                warn!("Release sync unavailable: {}", self);
                (
                    StatusCode::BAD_GATEWAY,
                    "sync_failed",
                    "Release synchronization failed",
                    Some(self.to_string()),
                )
            }
            SyncError::Cancelled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "shutting_down",
                "Service is shutting down",
                None,
            ),
            SyncError::Configuration(_) | SyncError::Database(_) => {
                error!("Release sync internal error: {}", self);
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
