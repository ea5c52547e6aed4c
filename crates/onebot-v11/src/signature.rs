//! HMAC-SHA1 verification for the inbound HTTP webhook's `X-Signature`
//! header, grounded in `v11/adapter.py`'s `_check_signature`.

use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Verifies `header` (expected form `sha1=<hex digest>`) against an HMAC
/// of `body` keyed with `secret`. Returns `false` for a malformed header
/// or a mismatched digest.
pub fn check_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(digest_hex) = header.strip_prefix("sha1=") else {
        return false;
    };
    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let expected_hex = hex::encode(expected);
    constant_time_eq(expected_hex.as_bytes(), digest_hex.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_a_correctly_signed_body() {
        let secret = "my-secret";
        let body = b"{\"post_type\":\"message\"}";
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let header = format!("sha1={}", hex::encode(mac.finalize().into_bytes()));
        assert!(check_signature(secret, body, &header));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = b"payload";
        let mut mac = HmacSha1::new_from_slice(b"right-secret").unwrap();
        mac.update(body);
        let header = format!("sha1={}", hex::encode(mac.finalize().into_bytes()));
        assert!(!check_signature("wrong-secret", body, &header));
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(!check_signature("secret", b"payload", "not-a-signature"));
    }
}
