//! HMAC-SHA256 authentication of webhook bodies.
//!
//! The sender signs the exact bytes it puts on the wire and the receiver
//! checks those same bytes before parsing them.

use base64::prelude::*;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;

use crate::{SigningError, SigningResult};

type HmacSha256 = Hmac<Sha256>;

const SECRET_BYTES: usize = 32;

/// A fresh random shared secret, base64 encoded.
pub fn generate_webhook_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    BASE64_STANDARD.encode(bytes)
}

fn mac_for(secret: &str) -> SigningResult<HmacSha256> {
    if secret.is_empty() {
        return Err(SigningError::invalid_key("webhook secret is empty"));
    }
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SigningError::invalid_key(format!("webhook secret: {e}")))
}

/// Base64 HMAC-SHA256 of `body` under `secret`.
pub fn sign_webhook_body(secret: &str, body: &[u8]) -> SigningResult<String> {
    let mut mac = mac_for(secret)?;
    mac.update(body);
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a base64 signature against `body`.
///
/// Malformed signatures and empty secrets verify as `false`.
pub fn verify_webhook_body(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = BASE64_STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = mac_for(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"eventType":"release.created"}"#;

    #[test]
    fn test_sign_then_verify() {
        let signature = sign_webhook_body("s3cret", BODY).unwrap();
        assert!(verify_webhook_body("s3cret", BODY, &signature));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let signature = sign_webhook_body("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex::encode(BASE64_STANDARD.decode(signature).unwrap()),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_any_byte_change_fails() {
        let signature = sign_webhook_body("s3cret", BODY).unwrap();
        let reformatted = br#"{ "eventType":"release.created"}"#;
        assert!(!verify_webhook_body("s3cret", reformatted, &signature));
        assert!(!verify_webhook_body("other", BODY, &signature));
    }

    #[test]
    fn test_generated_secrets_are_distinct() {
        let a = generate_webhook_secret();
        let b = generate_webhook_secret();
        assert_ne!(a, b);
        assert_eq!(BASE64_STANDARD.decode(&a).unwrap().len(), SECRET_BYTES);
        let signature = sign_webhook_body(&a, BODY).unwrap();
        assert!(verify_webhook_body(&a, BODY, &signature));
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(!verify_webhook_body("s3cret", BODY, "not base64!"));
        assert!(!verify_webhook_body("s3cret", BODY, ""));
        assert!(!verify_webhook_body("", BODY, "AAAA"));
        assert!(sign_webhook_body("", BODY).is_err());
    }
}
