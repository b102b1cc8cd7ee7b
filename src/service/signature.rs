use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-tavus-signature";

fn mac(secret: &str) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length")
}

/// Hex-encoded HMAC-SHA256 of `payload`.
pub fn sign_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = mac(secret);
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a webhook signature header against the raw body. Accepts plain hex or a
/// `sha256=` prefixed value. Comparison is constant time.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex(header)) else {
        return false;
    };

    let mut mac = mac(secret);
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Hex part of a signature header, without the optional `sha256=` prefix.
fn signature_hex(header: &str) -> &str {
    let trimmed = header.trim();
    trimmed.strip_prefix("sha256=").unwrap_or(trimmed)
}

/// Canonical form of a signature header: prefix stripped, lowercase hex. All
/// header spellings `verify_signature` accepts for one body map to the same value.
pub fn normalize_signature(header: &str) -> String {
    signature_hex(header).to_ascii_lowercase()
}

/// Token appended to the callback URL so the webhook can trust its `sessionId`
/// query parameter.
pub fn callback_token(secret: &str, session_id: &str) -> String {
    sign_hex(secret, session_id.as_bytes())
}

pub fn verify_callback_token(secret: &str, session_id: &str, token: &str) -> bool {
    verify_signature(secret, session_id.as_bytes(), token)
}

/// Hex SHA-256 of the raw body, used as the dedupe key for unsigned deliveries.
pub fn body_digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2
        let signature = sign_hex("Jefe", b"what do ya want for nothing?");
        assert_eq!(signature, "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843");
    }

    #[test]
    fn accepts_prefixed_and_plain_signatures() {
        let body = br#"{"event_type":"system.shutdown"}"#;
        let signature = sign_hex("secret", body);

        assert!(verify_signature("secret", body, &signature));
        assert!(verify_signature("secret", body, &format!("sha256={signature}")));
        assert!(verify_signature("secret", body, &signature.to_uppercase()));
    }

    #[test]
    fn rejects_wrong_secret_garbage_and_truncation() {
        let body = b"payload";
        let signature = sign_hex("secret", body);

        assert!(!verify_signature("other", body, &signature));
        assert!(!verify_signature("secret", body, "not-hex"));
        assert!(!verify_signature("secret", body, &signature[..32]));
        assert!(!verify_signature("secret", body, ""));
    }

    #[test]
    fn callback_token_is_bound_to_session() {
        let token = callback_token("secret", "abc-123");
        assert!(verify_callback_token("secret", "abc-123", &token));
        assert!(!verify_callback_token("secret", "abc-124", &token));
    }

    #[test]
    fn signature_spellings_normalize_to_one_key() {
        let signature = sign_hex("secret", b"body");
        assert_eq!(normalize_signature(&format!("sha256={signature}")), signature);
        assert_eq!(normalize_signature(&signature.to_uppercase()), signature);
        assert_eq!(normalize_signature(&format!("  {signature} ")), signature);
    }

    #[test]
    fn body_digest_is_stable() {
        assert_eq!(body_digest(b""), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    proptest! {
        #[test]
        fn signature_roundtrips_for_any_body(secret in "[ -~]{1,64}", body in proptest::collection::vec(any::<u8>(), 0..512)) {
            let signature = sign_hex(&secret, &body);
            prop_assert!(verify_signature(&secret, &body, &signature));
        }

        #[test]
        fn flipping_a_body_byte_breaks_the_signature(body in proptest::collection::vec(any::<u8>(), 1..256), index in any::<prop::sample::Index>()) {
            let signature = sign_hex("secret", &body);
            let mut tampered = body.clone();
            let i = index.index(tampered.len());
            tampered[i] ^= 0x01;
            prop_assert!(!verify_signature("secret", &tampered, &signature));
        }
    }
}
