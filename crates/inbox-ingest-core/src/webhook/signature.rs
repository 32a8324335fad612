//! Webhook authenticity checks.
//!
//! Two schemes are supported:
//!
//! | Scheme | Provider | Presented value |
//! |--------|----------|-----------------|
//! | [`HubSignatureVerifier`] | WhatsApp | `X-Hub-Signature-256: sha256=<hex>` over the raw body |
//! | [`PathSecretVerifier`] | Telegram | shared secret embedded in the webhook URL path |
//!
//! Verification never errors: anything that is not a positive match is `false`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SHA256_PREFIX: &str = "sha256=";

/// Check an `X-Hub-Signature-256` style header against the raw request body.
///
/// The `sha256=` prefix is optional and matched case-insensitively. Returns
/// `false` for an empty secret, an empty header, a digest that is not valid
/// hex, or a mismatch. The digest comparison is constant time.
pub fn verify_hub_signature(secret: &str, header: &str, body: &[u8]) -> bool {
    if secret.is_empty() || header.is_empty() {
        return false;
    }

    let hex_digest = match header.get(..SHA256_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(SHA256_PREFIX) => {
            &header[SHA256_PREFIX.len()..]
        }
        _ => header,
    };

    let Ok(presented) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&presented).is_ok()
}

/// Compare a secret taken from the request path with the configured one.
///
/// An empty expected secret accepts every request; that mode exists for
/// local and test deployments only.
pub fn verify_path_secret(expected: &str, presented: &str) -> bool {
    if expected.is_empty() {
        return true;
    }
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Authentication scheme a verifier implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationScheme {
    HubSignature,
    PathSecret,
}

/// Decides whether an inbound webhook really came from the claimed provider
pub trait SignatureVerifier: Send + Sync {
    /// `presented` is the signature header or path secret, `None` when absent
    fn verify(&self, presented: Option<&str>, body: &[u8]) -> bool;

    fn scheme(&self) -> VerificationScheme;
}

/// HMAC-SHA256 body signature verifier
pub struct HubSignatureVerifier {
    secret: String,
}

impl HubSignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for HubSignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSignatureVerifier")
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

impl SignatureVerifier for HubSignatureVerifier {
    fn verify(&self, presented: Option<&str>, body: &[u8]) -> bool {
        presented.is_some_and(|header| verify_hub_signature(&self.secret, header, body))
    }

    fn scheme(&self) -> VerificationScheme {
        VerificationScheme::HubSignature
    }
}

/// Shared path secret verifier
pub struct PathSecretVerifier {
    expected: String,
}

impl PathSecretVerifier {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }

    /// True when no secret is configured and every request is accepted
    pub fn is_permissive(&self) -> bool {
        self.expected.is_empty()
    }
}

impl std::fmt::Debug for PathSecretVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathSecretVerifier")
            .field("expected", &"<REDACTED>")
            .field("permissive", &self.is_permissive())
            .finish()
    }
}

impl SignatureVerifier for PathSecretVerifier {
    fn verify(&self, presented: Option<&str>, _body: &[u8]) -> bool {
        verify_path_secret(&self.expected, presented.unwrap_or_default())
    }

    fn scheme(&self) -> VerificationScheme {
        VerificationScheme::PathSecret
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
