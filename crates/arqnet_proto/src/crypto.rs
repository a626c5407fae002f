//! See [`PayloadCipher`].

use base64::{engine::general_purpose::URL_SAFE, Engine};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};

/// Length in bytes of the pre-shared symmetric key.
pub const KEY_LEN: usize = 32;

/// Length in bytes of the per-packet nonce prepended to the ciphertext.
pub const NONCE_LEN: usize = 12;

/// Process-wide pre-shared key.
///
/// Key exchange is an explicit non-goal: both peers are built with the same
/// fixed 256-bit key, and the confidentiality envelope exists to exercise the
/// corrupt-packet paths, not to protect real traffic.
pub const PRESHARED_KEY: [u8; KEY_LEN] = [
    0x61, 0x72, 0x71, 0x6e, 0x65, 0x74, 0x2d, 0x70, 0x72, 0x65, 0x73, 0x68, 0x61, 0x72, 0x65,
    0x64, 0x2d, 0x6b, 0x65, 0x79, 0x2d, 0x76, 0x30, 0x31, 0x2d, 0x66, 0x69, 0x78, 0x65, 0x64,
    0x21, 0x21,
];

/// Failed to open a sealed payload.
///
/// The validator treats this identically to a digest mismatch: the packet is
/// corrupt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OpenError {
    /// The payload field was not valid base64.
    #[error("payload is not valid base64")]
    Base64(#[source] base64::DecodeError),
    /// The payload was shorter than a nonce.
    #[error("payload too short to hold a nonce")]
    TooShort,
    /// Authenticated decryption failed.
    #[error("decryption failed")]
    Decrypt,
}

/// Seals and opens data payloads under the fixed pre-shared key.
///
/// The sealed form is `base64_urlsafe(nonce || ciphertext || tag)` with a
/// fresh random nonce per packet, so it fits in a JSON string field. Sealing
/// happens after the integrity digest is computed over the cleartext, and
/// opening before the digest is verified.
#[derive(Clone)]
pub struct PayloadCipher {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher").finish_non_exhaustive()
    }
}

impl Default for PayloadCipher {
    fn default() -> Self {
        Self::new(&PRESHARED_KEY)
    }
}

impl PayloadCipher {
    /// Creates a cipher from a raw 256-bit key.
    #[must_use]
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Seals a cleartext payload into its wire form.
    ///
    /// # Panics
    ///
    /// Panics if the underlying AEAD fails, which for ChaCha20-Poly1305 can
    /// only happen on payloads longer than 256 GiB.
    #[must_use]
    pub fn seal(&self, cleartext: &[u8]) -> String {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, cleartext)
            .expect("payload is far below the AEAD length limit");
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        URL_SAFE.encode(sealed)
    }

    /// Opens a wire-form payload back into its cleartext.
    ///
    /// # Errors
    ///
    /// Errors if the payload is malformed or fails authenticated decryption;
    /// both mean the packet is corrupt.
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, OpenError> {
        let raw = URL_SAFE.decode(sealed).map_err(OpenError::Base64)?;
        if raw.len() < NONCE_LEN {
            return Err(OpenError::TooShort);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| OpenError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let cipher = PayloadCipher::default();
        let sealed = cipher.seal(b"Hell");
        assert_eq!(cipher.open(&sealed).unwrap(), b"Hell");
    }

    #[test]
    fn nonces_differ_between_seals() {
        let cipher = PayloadCipher::default();
        assert_ne!(cipher.seal(b"o Wo"), cipher.seal(b"o Wo"));
    }

    #[test]
    fn tampered_payload_fails_to_open() {
        let cipher = PayloadCipher::default();
        let sealed = cipher.seal(b"rld!");
        let mut raw = URL_SAFE.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = URL_SAFE.encode(raw);
        assert_matches!(cipher.open(&tampered), Err(OpenError::Decrypt));
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = PayloadCipher::default().seal(b"abcd");
        let other = PayloadCipher::new(&[0x55; KEY_LEN]);
        assert_matches!(other.open(&sealed), Err(OpenError::Decrypt));
    }

    #[test]
    fn garbage_is_rejected() {
        let cipher = PayloadCipher::default();
        assert_matches!(cipher.open("not base64 !!!"), Err(OpenError::Base64(_)));
        assert_matches!(cipher.open("AAAA"), Err(OpenError::TooShort));
    }
}
