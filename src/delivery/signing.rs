//! HMAC-SHA1 payload signing.
//!
//! Signatures are sent in the `X-Hub-Signature` header as `sha1=<hex>`.

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::DeliveryError;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Sign a serialized payload and return the header value `sha1=<hex>`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, DeliveryError> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| DeliveryError::Signing(e.to_string()))?;
    mac.update(payload);
    Ok(format!("sha1={}", hex::encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_vector() {
        let sig = sign_payload("key", b"The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(sig, "sha1=de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9");
    }

    #[test]
    fn signature_is_stable() {
        let first = sign_payload("s", b"{}").unwrap();
        let second = sign_payload("s", b"{}").unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("sha1="));
        assert_eq!(first.len(), "sha1=".len() + 40);
    }

    #[test]
    fn different_secret_changes_signature() {
        assert_ne!(
            sign_payload("s", b"{}").unwrap(),
            sign_payload("t", b"{}").unwrap()
        );
    }

    #[test]
    fn empty_secret_is_accepted() {
        assert!(sign_payload("", b"{}").is_ok());
    }
}
