//! Integrity digest over cleartext payloads.
//!
//! The digest is computed by the sender over the cleartext chunk *before*
//! encryption and verified by the receiver *after* decryption; a mismatch
//! classifies the packet as corrupt. Two modes exist and must match on both
//! ends of a connection:
//!
//! - default: SHA-1, hex-encoded
//! - with the `sum-checksum` cargo feature: the sum of the payload bytes
//!   mod 256, rendered in decimal (a deliberately weak degraded mode for
//!   demonstrating undetected corruption)

#[cfg(not(feature = "sum-checksum"))]
use sha1::{Digest, Sha1};

/// Computes the integrity digest of a cleartext payload.
#[cfg(not(feature = "sum-checksum"))]
#[must_use]
pub fn digest(payload: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(payload);
    let out = hasher.finalize();
    let mut hex = String::with_capacity(out.len() * 2);
    for byte in out {
        use std::fmt::Write;
        // infallible on String
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Computes the integrity digest of a cleartext payload.
#[cfg(feature = "sum-checksum")]
#[must_use]
pub fn digest(payload: &[u8]) -> String {
    let sum = payload
        .iter()
        .fold(0u8, |acc, &byte| acc.wrapping_add(byte));
    sum.to_string()
}

/// Checks a received digest against the digest of the decrypted payload.
#[must_use]
pub fn verify(payload: &[u8], received: &str) -> bool {
    digest(payload) == received
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(feature = "sum-checksum"))]
    fn sha1_known_vector() {
        // sha1("abc")
        assert_eq!(digest(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[cfg(feature = "sum-checksum")]
    #[test]
    fn sum_wraps_at_256() {
        assert_eq!(digest(&[200, 100]), "44");
    }

    #[test]
    fn verify_round_trip() {
        let d = digest(b"Hell");
        assert!(verify(b"Hell", &d));
        assert!(!verify(b"HelL", &d));
    }
}
