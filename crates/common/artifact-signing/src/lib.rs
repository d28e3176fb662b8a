//! Signing authority for update artifacts.
//!
//! Artifacts are identified by the lowercase hex SHA-256 of their content.
//! The authority signs that digest with RSA (PKCS#1 v1.5, SHA-256 digest
//! info) and verifies signatures produced the same way.
//!
//! ## Signature Format
//!
//! ```text
//! base64( RSASSA-PKCS1-v1_5( DigestInfo(SHA-256, hex_decode(content_hash)) ) )
//! ```
//!
//! ## Environment Variables
//!
//! - `SIGNING_PRIVATE_KEY_PATH`: PEM private key, enables signing
//! - `SIGNING_PUBLIC_KEY_PATH`: PEM public key, used when no private key is found
//! - `SIGNING_KEYS_DIR`: Where a generated keypair is written (default: "./keys")
//!
//! Webhook bodies are authenticated separately with HMAC-SHA256, see
//! [`webhook`].

mod error;
pub mod webhook;

pub use error::{SigningError, SigningResult};
pub use webhook::{generate_webhook_secret, sign_webhook_body, verify_webhook_body};

use std::path::{Path, PathBuf};

use base64::prelude::*;
use rsa::{
    Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey, LineEnding},
};
use sha2::Sha256;
use tracing::{debug, error, info, warn};

/// Modulus size for generated keypairs.
pub const KEY_BITS: usize = 4096;

pub const PRIVATE_KEY_FILE: &str = "vendor-private-key.pem";
pub const PUBLIC_KEY_FILE: &str = "vendor-public-key.pem";

const SHA256_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub private_key_path: Option<PathBuf>,
    pub public_key_path: Option<PathBuf>,
    pub keys_dir: PathBuf,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            private_key_path: None,
            public_key_path: None,
            keys_dir: PathBuf::from("./keys"),
        }
    }
}

impl SigningConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let path_var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
        };

        Self {
            private_key_path: path_var("SIGNING_PRIVATE_KEY_PATH"),
            public_key_path: path_var("SIGNING_PUBLIC_KEY_PATH"),
            keys_dir: path_var("SIGNING_KEYS_DIR").unwrap_or_else(|| PathBuf::from("./keys")),
        }
    }
}

/// Where the authority's key material came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    PrivateKey,
    PublicKeyOnly,
    Generated,
}

/// Signs and verifies artifact hashes.
///
/// Key material is fixed at construction. Share one instance behind an `Arc`.
pub struct SignatureAuthority {
    private_key: Option<RsaPrivateKey>,
    public_key: RsaPublicKey,
    public_key_pem: String,
    source: KeySource,
}

impl std::fmt::Debug for SignatureAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureAuthority")
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("source", &self.source)
            .finish()
    }
}

impl SignatureAuthority {
    /// Resolve key material: configured private key, then configured public
    /// key (verify-only), then a freshly generated keypair persisted under
    /// `keys_dir`.
    pub fn load(config: &SigningConfig) -> SigningResult<Self> {
        Self::load_with_bits(config, KEY_BITS)
    }

    fn load_with_bits(config: &SigningConfig, bits: usize) -> SigningResult<Self> {
        if let Some(path) = config.private_key_path.as_deref().filter(|p| p.exists()) {
            let pem = std::fs::read_to_string(path)?;
            let authority = Self::from_private_pem(&pem)?;
            info!("Loaded RSA private key from {}", path.display());
            return Ok(authority);
        }

        if let Some(path) = config.public_key_path.as_deref().filter(|p| p.exists()) {
            let pem = std::fs::read_to_string(path)?;
            let authority = Self::from_public_pem(&pem)?;
            info!(
                "Loaded RSA public key from {}, signing disabled",
                path.display()
            );
            return Ok(authority);
        }

        Self::generate_with_bits(&config.keys_dir, bits)
    }

    pub fn from_private_pem(pem: &str) -> SigningResult<Self> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| SigningError::invalid_key(e.to_string()))?;
        let public_key = private_key.to_public_key();

        Self::assemble(Some(private_key), public_key, KeySource::PrivateKey)
    }

    /// Build a verify-only authority. `sign` fails with `SigningUnavailable`.
    pub fn from_public_pem(pem: &str) -> SigningResult<Self> {
        let public_key = RsaPublicKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPublicKey::from_public_key_pem(pem))
            .map_err(|e| SigningError::invalid_key(e.to_string()))?;

        Self::assemble(None, public_key, KeySource::PublicKeyOnly)
    }

    /// Generate a keypair and write both halves to `keys_dir`.
    pub fn generate(keys_dir: &Path) -> SigningResult<Self> {
        Self::generate_with_bits(keys_dir, KEY_BITS)
    }

    fn generate_with_bits(keys_dir: &Path, bits: usize) -> SigningResult<Self> {
        warn!("No existing signing keys found, generating a new {bits}-bit RSA keypair");
        warn!("Generated keys are for development only, provision keys explicitly in production");

        let private_key = RsaPrivateKey::new(&mut rand_core::OsRng, bits)
            .map_err(|e| SigningError::KeyGeneration(e.to_string()))?;
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| SigningError::KeyGeneration(e.to_string()))?;

        std::fs::create_dir_all(keys_dir)?;
        let private_path = keys_dir.join(PRIVATE_KEY_FILE);
        let public_path = keys_dir.join(PUBLIC_KEY_FILE);

        std::fs::write(&private_path, private_pem.as_bytes())?;
        restrict_to_owner(&private_path)?;

        let authority = Self::assemble(Some(private_key), public_key, KeySource::Generated)?;
        std::fs::write(&public_path, authority.public_key_pem.as_bytes())?;

        info!("Generated private key: {}", private_path.display());
        info!("Generated public key: {}", public_path.display());

        Ok(authority)
    }

    fn assemble(
        private_key: Option<RsaPrivateKey>,
        public_key: RsaPublicKey,
        source: KeySource,
    ) -> SigningResult<Self> {
        let public_key_pem = public_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| SigningError::invalid_key(e.to_string()))?;

        Ok(Self {
            private_key,
            public_key,
            public_key_pem,
            source,
        })
    }

    /// Sign a hex-encoded SHA-256 content hash, returning a base64 signature.
    ///
    /// # Errors
    ///
    /// Returns `SigningError::SigningUnavailable` when only a public key is
    /// loaded and `SigningError::InvalidHash` when the input is not a 32-byte
    /// hex digest.
    pub fn sign(&self, content_hash: &str) -> SigningResult<String> {
        let Some(private_key) = self.private_key.as_ref() else {
            error!(
                "Cannot sign hash {}: no private key loaded",
                hash_prefix(content_hash)
            );
            return Err(SigningError::SigningUnavailable);
        };

        let digest = decode_hash(content_hash)?;
        let signature = private_key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)?;

        debug!(
            "Signed hash {}... ({} byte signature)",
            hash_prefix(content_hash),
            signature.len()
        );

        Ok(BASE64_STANDARD.encode(signature))
    }

    /// Check a base64 signature against a hex content hash.
    ///
    /// Any malformed input counts as a failed verification.
    pub fn verify(&self, content_hash: &str, signature: &str) -> bool {
        let digest = match decode_hash(content_hash) {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Signature verification failed: {}", e);
                return false;
            }
        };

        let signature = match BASE64_STANDARD.decode(signature.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Signature verification failed: malformed signature: {}", e);
                return false;
            }
        };

        match self
            .public_key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        {
            Ok(()) => {
                info!(
                    "Signature verification passed for hash {}...",
                    hash_prefix(content_hash)
                );
                true
            }
            Err(_) => {
                warn!(
                    "Signature verification FAILED for hash {}...",
                    hash_prefix(content_hash)
                );
                false
            }
        }
    }

    /// PKCS#1 PEM encoding of the public key.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    pub fn can_sign(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn key_source(&self) -> KeySource {
        self.source
    }
}

fn decode_hash(content_hash: &str) -> SigningResult<[u8; SHA256_LEN]> {
    let bytes = hex::decode(content_hash.trim())
        .map_err(|e| SigningError::invalid_hash(e.to_string()))?;

    bytes.try_into().map_err(|bytes: Vec<u8>| {
        SigningError::invalid_hash(format!(
            "expected {SHA256_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

fn hash_prefix(content_hash: &str) -> &str {
    content_hash.get(..16).unwrap_or(content_hash)
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
