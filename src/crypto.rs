//! HMAC-SHA256 signing for webhook payloads.
//!
//! The same scheme covers both directions: outbound deliveries are signed
//! with the subscription secret, inbound provider webhooks are verified
//! against the configured provider secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a hex-encoded signature.
pub fn verify(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let sig = sign("subscription-secret", b"{\"event\":\"payment.completed\"}");
        assert!(verify(
            "subscription-secret",
            b"{\"event\":\"payment.completed\"}",
            &sig
        ));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let sig = sign("secret-a", b"payload");
        assert!(!verify("secret-b", b"payload", &sig));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let sig = sign("secret", b"payload");
        assert!(!verify("secret", b"payload-tampered", &sig));
    }

    #[test]
    fn malformed_hex_fails_verification() {
        assert!(!verify("secret", b"payload", "not-hex-at-all"));
    }

    #[test]
    fn signature_is_deterministic() {
        assert_eq!(sign("s", b"x"), sign("s", b"x"));
        assert_ne!(sign("s", b"x"), sign("s", b"y"));
    }
}
