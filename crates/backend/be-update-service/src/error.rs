use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use be_remote_db::DbError;
use be_storage::StorageError;
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
pub enum UpdateServiceError {
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No file uploaded")]
    MissingFile,

    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Update version {0} already exists")]
    VersionExists(String),

    #[error("Update {id} is referenced by {releases} release(s)")]
    UpdateInUse { id: Uuid, releases: usize },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Artifact missing from storage: {0}")]
    ArtifactMissing(String),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl UpdateServiceError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type UpdateServiceResult<T> = std::result::Result<T, UpdateServiceError>;

impl IntoResponse for UpdateServiceError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            UpdateServiceError::InvalidVersion(v) => {
                warn!("Invalid version provided: {}", v);
                (
                    StatusCode::BAD_REQUEST,
                    "invalid_version",
                    "Invalid version format",
                    Some(format!("Version '{}' is not a valid semantic version", v)),
                )
            }
            UpdateServiceError::Validation(_) | UpdateServiceError::MissingFile => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "Invalid request",
                Some(self.to_string()),
            ),
            UpdateServiceError::Multipart(e) => {
                warn!("Rejected multipart upload: {}", e);
                (
                    StatusCode::BAD_REQUEST,
                    "invalid_multipart",
                    "Malformed upload",
                    Some(e.body_text()),
                )
            }
            UpdateServiceError::VersionExists(v) => {
                warn!("Duplicate update version: {}", v);
                (
                    StatusCode::CONFLICT,
                    "version_exists",
                    "Update version already exists",
                    Some(self.to_string()),
                )
            }
            UpdateServiceError::UpdateInUse { id, releases } => {
                warn!("Refused to delete update {} used by {} releases", id, releases);
                (
                    StatusCode::CONFLICT,
                    "update_in_use",
                    "Update is referenced by releases",
                    Some(self.to_string()),
                )
            }
            UpdateServiceError::NotFound { .. } => (
                StatusCode::NOT_FOUND,
                "not_found",
                "Resource not found",
                Some(self.to_string()),
            ),
            UpdateServiceError::ArtifactMissing(handle) => {
                error!("Artifact {} missing from storage", handle);
                (
                    StatusCode::NOT_FOUND,
                    "download_not_found",
                    "Update package not found",
                    None,
                )
            }
            UpdateServiceError::Storage(StorageError::Stream(e)) => {
                warn!("Upload stream failed: {}", e);
                (
                    StatusCode::BAD_REQUEST,
                    "upload_failed",
                    "Upload could not be read",
                    None,
                )
            }
            UpdateServiceError::Storage(e) => {
                error!("Storage operation failed: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    "Update service temporarily unavailable",
                    None,
                )
            }
            UpdateServiceError::Database(e) if e.is_duplicate() || e.is_foreign_key() => {
                warn!("Conflicting write: {}", e);
                (
                    StatusCode::CONFLICT,
                    "conflict",
                    "Conflicting write",
                    Some(e.to_string()),
                )
            }
            UpdateServiceError::Database(e) => {
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
