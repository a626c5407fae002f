//! Per-packet validation.
//!
//! Every received data packet passes through [`Validator::verdict`], which
//! checks, in order: session match, decryption, digest equality, payload
//! length. The first failing check classifies the packet. A session
//! mismatch is special: the record is foreign, not corrupt, and is discarded
//! without any reply (it may belong to a stale or concurrent session).

use crate::{
    checksum,
    crypto::{OpenError, PayloadCipher},
    packet::Packet,
    seq::Seq,
};

/// Why a data packet failed validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PacketFlaw {
    /// The sealed payload would not open.
    #[error("payload would not decrypt")]
    Decrypt(#[source] OpenError),
    /// The digest recomputed over the decrypted payload did not match the
    /// received checksum field.
    #[error("checksum mismatch")]
    DigestMismatch,
    /// The decrypted payload was not text.
    #[error("payload is not valid UTF-8")]
    NotText,
    /// The cleartext was longer than the negotiated chunk size.
    #[error("payload length {len} exceeds chunk size {max}")]
    Oversize {
        /// Cleartext length in characters.
        len: usize,
        /// Negotiated chunk size.
        max: usize,
    },
}

/// Outcome of validating one received data packet.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// The record belongs to a different session; discard silently.
    Foreign,
    /// The packet passed every check.
    Intact {
        /// Sequence number of the chunk.
        sequence: Seq,
        /// Total chunks in the chunk's message.
        total_packets: usize,
        /// Whether this is the message's final chunk.
        is_last: bool,
        /// The decrypted, verified cleartext.
        cleartext: String,
    },
    /// The packet failed a check after the session matched. The envelope
    /// fields are still readable and drive the receiver's reaction (SR nacks
    /// the sequence; GBN latches and checks `is_last`).
    Corrupt {
        /// Sequence number from the envelope.
        sequence: Seq,
        /// Total chunks from the envelope.
        total_packets: usize,
        /// `is_last` from the envelope.
        is_last: bool,
        /// The first check that failed.
        flaw: PacketFlaw,
    },
}

/// Validates incoming data packets for one session.
#[derive(Debug, Clone)]
pub struct Validator {
    cipher: PayloadCipher,
    session_id: String,
    payload_len: usize,
}

impl Validator {
    /// Creates a validator for the given session.
    #[must_use]
    pub fn new(cipher: PayloadCipher, session_id: impl Into<String>, payload_len: usize) -> Self {
        Self {
            cipher,
            session_id: session_id.into(),
            payload_len,
        }
    }

    /// Classifies a received packet. Returns [`None`] for anything that is
    /// not a data packet.
    #[must_use]
    pub fn verdict(&self, packet: &Packet) -> Option<Verdict> {
        let Packet::Data {
            session_id,
            sequence,
            total_packets,
            is_last,
            data,
            checksum: received_digest,
            ..
        } = packet
        else {
            return None;
        };
        if *session_id != self.session_id {
            return Some(Verdict::Foreign);
        }

        let corrupt = |flaw| Verdict::Corrupt {
            sequence: *sequence,
            total_packets: *total_packets,
            is_last: *is_last,
            flaw,
        };

        let cleartext = match self.cipher.open(data) {
            Ok(bytes) => bytes,
            Err(err) => return Some(corrupt(PacketFlaw::Decrypt(err))),
        };
        if !checksum::verify(&cleartext, received_digest) {
            return Some(corrupt(PacketFlaw::DigestMismatch));
        }
        let Ok(text) = String::from_utf8(cleartext) else {
            return Some(corrupt(PacketFlaw::NotText));
        };
        let len = text.chars().count();
        if len > self.payload_len {
            return Some(corrupt(PacketFlaw::Oversize {
                len,
                max: self.payload_len,
            }));
        }

        Some(Verdict::Intact {
            sequence: *sequence,
            total_packets: *total_packets,
            is_last: *is_last,
            cleartext: text,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::{checksum::digest, packet::Protocol};

    use super::*;

    fn data_packet(session_id: &str, cleartext: &str, checksum: &str) -> Packet {
        Packet::Data {
            session_id: session_id.to_owned(),
            sequence: Seq(0),
            total_packets: 1,
            is_last: true,
            data: PayloadCipher::default().seal(cleartext.as_bytes()),
            protocol: Protocol::Sr,
            checksum: checksum.to_owned(),
            timestamp: None,
        }
    }

    fn validator() -> Validator {
        Validator::new(PayloadCipher::default(), "ab12cd34", 4)
    }

    #[test]
    fn intact_packet_yields_cleartext() {
        let packet = data_packet("ab12cd34", "Hell", &digest(b"Hell"));
        assert_matches!(
            validator().verdict(&packet),
            Some(Verdict::Intact { cleartext, .. }) if cleartext == "Hell"
        );
    }

    #[test]
    fn foreign_session_is_not_corrupt() {
        let packet = data_packet("deadbeef", "Hell", &digest(b"Hell"));
        assert_matches!(validator().verdict(&packet), Some(Verdict::Foreign));
    }

    #[test]
    fn wrong_digest_is_corrupt() {
        let packet = data_packet("ab12cd34", "Hell", &digest(b"XXXX"));
        assert_matches!(
            validator().verdict(&packet),
            Some(Verdict::Corrupt {
                flaw: PacketFlaw::DigestMismatch,
                ..
            })
        );
    }

    #[test]
    fn unopenable_payload_is_corrupt() {
        let mut packet = data_packet("ab12cd34", "Hell", &digest(b"Hell"));
        if let Packet::Data { data, .. } = &mut packet {
            *data = "AAAA".to_owned();
        }
        assert_matches!(
            validator().verdict(&packet),
            Some(Verdict::Corrupt {
                flaw: PacketFlaw::Decrypt(_),
                ..
            })
        );
    }

    #[test]
    fn oversize_cleartext_is_corrupt() {
        let packet = data_packet("ab12cd34", "toolong", &digest(b"toolong"));
        assert_matches!(
            validator().verdict(&packet),
            Some(Verdict::Corrupt {
                flaw: PacketFlaw::Oversize { len: 7, max: 4 },
                ..
            })
        );
    }

    #[test]
    fn non_data_packets_are_ignored() {
        let packet = Packet::Close {
            session_id: "ab12cd34".to_owned(),
            message: None,
        };
        assert_matches!(validator().verdict(&packet), None);
    }
}
