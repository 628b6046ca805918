//! HMAC-SHA256 helpers for webhook payload authentication

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Generate an HMAC-SHA256 over `message`, hex-encoded.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key)
        .expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Generate a GitHub-style signature header value (`sha256=<hex>`).
pub fn signature_header(key: &[u8], message: &[u8]) -> String {
    format!("sha256={}", hmac_sha256(key, message))
}

/// Verify a GitHub-style `x-hub-signature-256` header against the raw
/// request body. The header must carry the `sha256=` prefix followed by
/// a hex digest. Comparison is constant-time.
pub fn verify_signature_header(key: &[u8], raw_body: &[u8], header: &str) -> bool {
    let Some(hex_digest) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(key)
        .expect("HMAC can take key of any size");
    mac.update(raw_body);
    // Mac::verify_slice is constant-time
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_roundtrip() {
        let key = b"secret_key";
        let body = b"{\"action\":\"opened\"}";
        let header = signature_header(key, body);

        assert!(header.starts_with("sha256="));
        assert!(verify_signature_header(key, body, &header));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let body = b"payload";
        let header = signature_header(b"right_key", body);

        assert!(!verify_signature_header(b"wrong_key", body, &header));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let key = b"secret";
        let header = signature_header(key, b"original");

        assert!(!verify_signature_header(key, b"tampered", &header));
    }

    #[test]
    fn test_malformed_header_rejected() {
        let key = b"secret";
        let body = b"payload";

        assert!(!verify_signature_header(key, body, "sha1=abcdef"));
        assert!(!verify_signature_header(key, body, "not-a-signature"));
        assert!(!verify_signature_header(key, body, "sha256=not-hex!"));
        assert!(!verify_signature_header(key, body, ""));
    }

    #[test]
    fn test_known_digest() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            mac,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
