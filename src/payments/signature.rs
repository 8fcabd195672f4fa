use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Check a hex-encoded HMAC-SHA256 of `body` in constant time.
/// Malformed hex is treated as a mismatch.
pub fn verify_signature(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(provided) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

#[cfg(test)]
pub(crate) fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let body = br#"{"event":"payment.captured"}"#;
        let signature = sign(b"secret", body);
        assert!(verify_signature(b"secret", body, &signature));
        assert!(!verify_signature(b"other", body, &signature));
        assert!(!verify_signature(b"secret", b"tampered", &signature));
    }

    #[test]
    fn test_malformed_signature() {
        assert!(!verify_signature(b"secret", b"body", "not-hex"));
        assert!(!verify_signature(b"secret", b"body", ""));
        assert!(!verify_signature(b"secret", b"body", "abcd"));
    }
}
