//! Webhook signature schemes
//!
//! All comparisons go through `Mac::verify_slice`, which is constant-time.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Hex HMAC-SHA256 of `payload`.
pub fn sign_sha256_hex(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Base64 HMAC-SHA1 over `url || payload`.
pub fn sign_sha1_base64(secret: &str, url: &str, payload: &[u8]) -> String {
    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(url.as_bytes());
    mac.update(payload);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Check a hex HMAC-SHA256 signature. A `sha256=` prefix is tolerated.
pub fn verify_sha256_hex(secret: &str, payload: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Check a base64 HMAC-SHA1 signature computed over `url || payload`.
pub fn verify_sha1_base64(secret: &str, url: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(url.as_bytes());
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // RFC 4231 test case 2
        let sig = sign_sha256_hex("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        assert!(verify_sha256_hex("Jefe", b"what do ya want for nothing?", &sig));
        assert!(verify_sha256_hex(
            "Jefe",
            b"what do ya want for nothing?",
            &format!("sha256={sig}")
        ));
    }

    #[test]
    fn test_sha256_rejects_tampering() {
        let sig = sign_sha256_hex("secret", b"{\"event_type\":\"CALL_ENDED\"}");
        assert!(!verify_sha256_hex("secret", b"{\"event_type\":\"CALL_FAILED\"}", &sig));
        assert!(!verify_sha256_hex("other", b"{\"event_type\":\"CALL_ENDED\"}", &sig));
        assert!(!verify_sha256_hex("secret", b"x", "not-hex"));
    }

    #[test]
    fn test_sha1_includes_url() {
        let sig = sign_sha1_base64("token", "https://hooks/twilio", b"body");
        assert!(verify_sha1_base64("token", "https://hooks/twilio", b"body", &sig));
        assert!(!verify_sha1_base64("token", "https://hooks/other", b"body", &sig));
        assert!(!verify_sha1_base64("token", "https://hooks/twilio", b"body", "%%%"));
    }
}
