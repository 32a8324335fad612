//! Tests for webhook signature verification.

use super::*;

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

// ============================================================================
// Hub signature
// ============================================================================

mod hub_signature_tests {
    use super::*;

    const BODY: &[u8] = br#"{"entry":[]}"#;

    /// Verify that a correct prefixed digest is accepted.
    #[test]
    fn test_valid_prefixed_signature() {
        let header = format!("sha256={}", sign("app-secret", BODY));
        assert!(verify_hub_signature("app-secret", &header, BODY));
    }

    /// Verify that the prefix is matched case-insensitively.
    #[test]
    fn test_prefix_is_case_insensitive() {
        let header = format!("SHA256={}", sign("app-secret", BODY));
        assert!(verify_hub_signature("app-secret", &header, BODY));
    }

    /// Verify that a bare hex digest is accepted.
    #[test]
    fn test_bare_hex_digest() {
        assert!(verify_hub_signature("app-secret", &sign("app-secret", BODY), BODY));
    }

    /// Verify that uppercase hex digits decode to the same digest.
    #[test]
    fn test_uppercase_hex_digest() {
        let header = format!("sha256={}", sign("app-secret", BODY).to_uppercase());
        assert!(verify_hub_signature("app-secret", &header, BODY));
    }

    /// Verify that a digest made with another secret is rejected.
    #[test]
    fn test_wrong_secret_rejected() {
        let header = format!("sha256={}", sign("other-secret", BODY));
        assert!(!verify_hub_signature("app-secret", &header, BODY));
    }

    /// Verify that a tampered body is rejected.
    #[test]
    fn test_tampered_body_rejected() {
        let header = format!("sha256={}", sign("app-secret", BODY));
        assert!(!verify_hub_signature("app-secret", &header, br#"{"entry":[1]}"#));
    }

    /// Verify that a truncated digest is rejected.
    #[test]
    fn test_truncated_digest_rejected() {
        let digest = sign("app-secret", BODY);
        let header = format!("sha256={}", &digest[..digest.len() - 2]);
        assert!(!verify_hub_signature("app-secret", &header, BODY));
    }

    /// Verify that odd-length and non-hex digests are rejected.
    #[test]
    fn test_malformed_hex_rejected() {
        assert!(!verify_hub_signature("app-secret", "sha256=abc", BODY));
        assert!(!verify_hub_signature("app-secret", "sha256=zzzz", BODY));
    }

    /// Verify that an empty secret or header is rejected.
    #[test]
    fn test_empty_inputs_rejected() {
        let header = format!("sha256={}", sign("app-secret", BODY));
        assert!(!verify_hub_signature("", &header, BODY));
        assert!(!verify_hub_signature("app-secret", "", BODY));
        assert!(!verify_hub_signature("app-secret", "sha256=", BODY));
    }

    /// Verify that multi-byte characters near the prefix do not panic.
    #[test]
    fn test_non_ascii_header_rejected() {
        assert!(!verify_hub_signature("app-secret", "shä256=00", BODY));
    }

    /// Verify that the trait implementation rejects a missing header.
    #[test]
    fn test_verifier_requires_header() {
        let verifier = HubSignatureVerifier::new("app-secret");
        let header = format!("sha256={}", sign("app-secret", BODY));

        assert!(verifier.verify(Some(&header), BODY));
        assert!(!verifier.verify(None, BODY));
        assert_eq!(verifier.scheme(), VerificationScheme::HubSignature);
    }

    /// Verify that Debug output never shows the secret.
    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", HubSignatureVerifier::new("app-secret"));
        assert!(!rendered.contains("app-secret"));
    }
}

// ============================================================================
// Path secret
// ============================================================================

mod path_secret_tests {
    use super::*;

    /// Verify that the configured secret must match exactly.
    #[test]
    fn test_matching_secret_accepted() {
        assert!(verify_path_secret("s3cret", "s3cret"));
        assert!(!verify_path_secret("s3cret", "s3cre"));
        assert!(!verify_path_secret("s3cret", "S3CRET"));
        assert!(!verify_path_secret("s3cret", ""));
    }

    /// Verify that an unconfigured secret accepts anything.
    #[test]
    fn test_empty_expected_is_permissive() {
        let verifier = PathSecretVerifier::new("");

        assert!(verifier.is_permissive());
        assert!(verifier.verify(Some("anything"), b""));
        assert!(verifier.verify(None, b""));
    }

    /// Verify that a configured verifier rejects a missing secret.
    #[test]
    fn test_configured_verifier_rejects_missing_secret() {
        let verifier = PathSecretVerifier::new("s3cret");

        assert!(!verifier.verify(None, b""));
        assert!(verifier.verify(Some("s3cret"), b""));
        assert_eq!(verifier.scheme(), VerificationScheme::PathSecret);
    }
}
