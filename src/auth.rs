// src/auth.rs

//! Origin authentication: HMAC-SHA256 over a node's origin identifier.
//!
//! The tag authenticates *origin only*, never the payload — replay is
//! out of scope (spec §4.C). Verification compares the raw MAC bytes
//! in constant time via `hmac::Mac::verify_slice`, not a hand-rolled
//! hex-string `==`, which is the buggy variant the spec calls out.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes and verifies origin-authentication tags under a shared key.
pub struct Auth {
    key: Vec<u8>,
    origin: String,
}

impl Auth {
    pub fn new(key: impl Into<Vec<u8>>, origin: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            origin: origin.into(),
        }
    }

    /// This node's own origin identifier.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Hex-encoded HMAC tag over `self.origin`.
    pub fn digest(&self) -> String {
        self.tag_for(&self.origin)
    }

    /// Hex-encoded HMAC tag over an arbitrary origin (used by tests and
    /// by callers constructing envelopes for a different origin).
    pub fn tag_for(&self, origin: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(origin.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Returns true iff `tag` (hex-encoded) is a valid HMAC of `origin`
    /// under this node's shared key. Constant-time.
    pub fn verify(&self, tag: &str, origin: &str) -> bool {
        let Ok(expected) = hex::decode(tag) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(origin.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_round_trips_through_verify() {
        let auth = Auth::new(b"shared-secret".to_vec(), "alpha");
        let tag = auth.digest();
        assert!(auth.verify(&tag, "alpha"));
    }

    #[test]
    fn verify_rejects_altered_origin() {
        let auth = Auth::new(b"shared-secret".to_vec(), "alpha");
        let tag = auth.digest();
        assert!(!auth.verify(&tag, "mallory"));
    }

    #[test]
    fn verify_rejects_forged_tag() {
        let auth = Auth::new(b"shared-secret".to_vec(), "alpha");
        assert!(!auth.verify("deadbeef", "mallory"));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let a = Auth::new(b"key-one".to_vec(), "alpha");
        let b = Auth::new(b"key-two".to_vec(), "alpha");
        let tag = a.digest();
        assert!(!b.verify(&tag, "alpha"));
    }
}
