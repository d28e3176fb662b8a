use std::{path::Path, sync::Arc};

use artifact_signing::SignatureAuthority;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

use crate::error::AgentResult;

const READ_CHUNK: usize = 64 * 1024;

/// Outcome of checking a downloaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    HashMismatch { expected: String, actual: String },
    MissingSignature,
    InvalidSignature,
}

impl Verdict {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

/// Gate between download and install. Integrity is checked first, then
/// authenticity against the locally configured authority key.
#[derive(Clone)]
pub struct Verifier {
    authority: Arc<SignatureAuthority>,
}

impl Verifier {
    pub fn new(authority: Arc<SignatureAuthority>) -> Self {
        Self { authority }
    }

    pub fn check(&self, actual_hash: &str, expected_hash: &str, signature: &str) -> Verdict {
        if !actual_hash.eq_ignore_ascii_case(expected_hash.trim()) {
            return Verdict::HashMismatch {
                expected: expected_hash.to_string(),
                actual: actual_hash.to_string(),
            };
        }
        if signature.trim().is_empty() {
            return Verdict::MissingSignature;
        }
        if !self.authority.verify(actual_hash, signature) {
            return Verdict::InvalidSignature;
        }
        Verdict::Verified
    }

    /// Hash the file at `path` and check it. Any verdict other than
    /// [`Verdict::Verified`] deletes the file.
    pub async fn verify_file(
        &self,
        path: &Path,
        expected_hash: &str,
        signature: &str,
        version: &str,
    ) -> AgentResult<Verdict> {
        let actual = match hash_file(path).await {
            Ok(actual) => actual,
            Err(e) => {
                error!("Could not hash update {}: {}", version, e);
                discard_artifact(path).await;
                return Err(e);
            }
        };
        let verdict = self.check(&actual, expected_hash, signature);

        match &verdict {
            Verdict::Verified => {
                info!("Update {} passed integrity and signature checks", version);
                return Ok(verdict);
            }
            Verdict::HashMismatch { expected, actual } => {
                error!(
                    "SECURITY: hash mismatch for update {}. Expected: {}, Got: {}",
                    version, expected, actual
                );
            }
            Verdict::MissingSignature => {
                error!(
                    "SECURITY: update {} has no digital signature, refusing unsigned update",
                    version
                );
            }
            Verdict::InvalidSignature => {
                error!(
                    "SECURITY: signature verification failed for update {}",
                    version
                );
            }
        }

        discard_artifact(path).await;
        Ok(verdict)
    }
}

/// Remove an artifact that must not be installed. Failure is logged only.
pub async fn discard_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete artifact {}: {}", path.display(), e),
    }
}

/// Lowercase hex SHA-256 of a file, read in chunks.
pub async fn hash_file(path: &Path) -> AgentResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
