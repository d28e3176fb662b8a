//! Error types for artifact signing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SigningError {
    /// Only the public half of the keypair is loaded.
    #[error("Signing unavailable: no private key loaded")]
    SigningUnavailable,

    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Signature creation failed: {0}")]
    Signature(#[from] rsa::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SigningError {
    pub fn invalid_hash(msg: impl Into<String>) -> Self {
        Self::InvalidHash(msg.into())
    }

    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::SigningUnavailable)
    }
}

pub type SigningResult<T> = std::result::Result<T, SigningError>;
