//! Error types for the artifact store

use artifact_signing::SigningError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage operation failed: {0}")]
    OpenDal(#[from] opendal::Error),

    #[error("Invalid artifact handle: {0}")]
    InvalidHandle(String),

    #[error("Upload stream failed: {0}")]
    Stream(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Artifact signing failed: {0}")]
    Signing(#[from] SigningError),
}

impl StorageError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn missing_env_var(var_name: impl Into<String>) -> Self {
        Self::MissingEnvVar(var_name.into())
    }

    pub fn invalid_handle(handle: impl Into<String>) -> Self {
        Self::InvalidHandle(handle.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::MissingEnvVar(_))
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let missing_var = StorageError::missing_env_var("ARTIFACT_STORAGE_S3_BUCKET");
        assert!(matches!(missing_var, StorageError::MissingEnvVar(_)));
        assert_eq!(
            missing_var.to_string(),
            "Missing required environment variable: ARTIFACT_STORAGE_S3_BUCKET"
        );

        let handle = StorageError::invalid_handle("../etc/passwd");
        assert_eq!(
            handle.to_string(),
            "Invalid artifact handle: ../etc/passwd"
        );
        assert!(StorageError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_error_from_conversions() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let storage_error: StorageError = io_error.into();
        assert!(matches!(storage_error, StorageError::Io(_)));

        let signing: StorageError = SigningError::SigningUnavailable.into();
        assert!(matches!(signing, StorageError::Signing(_)));
    }

    #[test]
    fn test_is_configuration() {
        assert!(StorageError::configuration("test").is_configuration());
        assert!(StorageError::missing_env_var("VAR").is_configuration());
        assert!(!StorageError::Cancelled.is_configuration());
    }
}
