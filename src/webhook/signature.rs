//! HMAC-SHA256 webhook signatures (`X-Hub-Signature-256: sha256=<hex>`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::SignatureError;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

fn mac_for(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size")
}

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = mac_for(secret);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Header value for `body`, e.g. `sha256=3f2a...`.
pub fn format_signature_header(secret: &str, body: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, compute_signature(secret, body))
}

/// Decode the digest bytes from a `sha256=<hex>` header value.
pub fn parse_signature_header(header: &str) -> Result<Vec<u8>, SignatureError> {
    let hex_digest = header
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| SignatureError::Malformed("expected 'sha256=' prefix".to_string()))?;
    hex::decode(hex_digest).map_err(|e| SignatureError::Malformed(e.to_string()))
}

/// Verify `header` against the HMAC of `body`. The digest comparison is constant-time.
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let expected = parse_signature_header(header)?;
    let mut mac = mac_for(secret);
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_signature_known_vector() {
        // Example from GitHub's webhook validation docs
        let signature = compute_signature("It's a Secret to Everybody", b"Hello, World!");
        assert_eq!(
            signature,
            "757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        );
    }

    #[test]
    fn test_verify_valid_signature() {
        let body = br#"{"action":"opened"}"#;
        let header = format_signature_header("secret", body);
        assert!(verify_signature("secret", body, Some(&header)).is_ok());
    }

    #[test]
    fn test_verify_wrong_secret() {
        let body = br#"{"action":"opened"}"#;
        let header = format_signature_header("other", body);
        assert_eq!(
            verify_signature("secret", body, Some(&header)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_verify_tampered_body() {
        let header = format_signature_header("secret", b"original");
        assert_eq!(
            verify_signature("secret", b"tampered", Some(&header)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_verify_missing_header() {
        assert_eq!(
            verify_signature("secret", b"body", None),
            Err(SignatureError::Missing)
        );
    }

    #[test]
    fn test_verify_malformed_header() {
        assert!(matches!(
            verify_signature("secret", b"body", Some("sha1=abcdef")),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            verify_signature("secret", b"body", Some("sha256=not-hex")),
            Err(SignatureError::Malformed(_))
        ));
    }

    #[test]
    fn test_verify_truncated_digest_is_mismatch() {
        let header = format_signature_header("secret", b"body");
        let truncated = &header[..header.len() - 2];
        assert_eq!(
            verify_signature("secret", b"body", Some(truncated)),
            Err(SignatureError::Mismatch)
        );
    }
}
