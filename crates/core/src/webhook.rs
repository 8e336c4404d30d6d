//! Webhook signature verification.
//!
//! Signatures are HMAC digests of the exact raw request body, hex encoded,
//! optionally prefixed with the algorithm (`sha1=` or `sha256=`). A bare hex
//! digest is treated as SHA-256. Comparison is constant time.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use crate::errors::WebhookError;

/// Preferred signature header.
pub const SIGNATURE_HEADER_256: &str = "x-hub-signature-256";
/// Legacy SHA-1 signature header, consulted when the SHA-256 one is absent.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// Check `signature` against `body` using the profile's `secret`.
pub fn verify_signature(
    signature: Option<&str>,
    body: &[u8],
    secret: Option<&str>,
) -> Result<(), WebhookError> {
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(WebhookError::SecretNotConfigured)?;
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(WebhookError::MissingSignature)?;

    if let Some(hex_sig) = signature.strip_prefix("sha1=") {
        let expected = hex::decode(hex_sig).map_err(|_| WebhookError::Malformed)?;
        let mut mac =
            Hmac::<Sha1>::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::Malformed)?;
        mac.update(body);
        return mac.verify_slice(&expected).map_err(|_| WebhookError::Mismatch);
    }

    let hex_sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = hex::decode(hex_sig).map_err(|_| WebhookError::Malformed)?;
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::Malformed)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| WebhookError::Mismatch)
}

/// Hex SHA-256 signature of `body`, with its `sha256=` prefix.
pub fn sign_sha256(body: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
