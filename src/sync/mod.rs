//! Sync Gateway
//! Mission: Hand finished signals to the downstream consumer, exactly once
//!
//! Two independently owned ledgers sync over authenticated HTTP. Requests
//! carry an HMAC signature over the signal's content hash; the receiver
//! re-verifies both the signature and the hash before storing, and treats a
//! duplicate hash as success so retries can never create duplicate records.

pub mod client;
pub mod receiver;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Request header carrying the HMAC signature
pub const SIGNATURE_HEADER: &str = "x-sync-signature";

pub const STATUS_STORED: &str = "stored";
pub const STATUS_DUPLICATE: &str = "duplicate_ignored";
pub const STATUS_AUTH_FAILED: &str = "authentication_failed";
pub const STATUS_HASH_MISMATCH: &str = "hash_mismatch";

/// Hex HMAC-SHA256 of the content hash under the shared secret
pub fn sign_content_hash(shared_secret: &str, content_hash: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(shared_secret.as_bytes())
        .expect("HMAC key of any length is valid");
    mac.update(content_hash.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a presented hex signature
pub fn verify_signature(shared_secret: &str, content_hash: &str, presented_hex: &str) -> bool {
    let Ok(presented) = hex::decode(presented_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(shared_secret.as_bytes()) else {
        return false;
    };
    mac.update(content_hash.as_bytes());
    mac.verify_slice(&presented).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let signature = sign_content_hash("secret", "abc123");
        assert!(verify_signature("secret", "abc123", &signature));
    }

    #[test]
    fn wrong_secret_fails() {
        let signature = sign_content_hash("secret", "abc123");
        assert!(!verify_signature("other", "abc123", &signature));
    }

    #[test]
    fn wrong_content_fails() {
        let signature = sign_content_hash("secret", "abc123");
        assert!(!verify_signature("secret", "abc124", &signature));
    }

    #[test]
    fn malformed_hex_fails() {
        assert!(!verify_signature("secret", "abc123", "not-hex"));
    }
}
