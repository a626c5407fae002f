//! Newline-delimited record framing.
//!
//! The byte stream carries exactly one record per newline-terminated
//! fragment. [`encode`] produces one framed record; [`LineBuffer`]
//! accumulates raw bytes from the stream and yields complete records as they
//! arrive, however the transport chose to split them.

use crate::packet::{DecodeError, Envelope, Packet};

/// Frames one packet as a newline-terminated wire record.
///
/// # Panics
///
/// Panics if the envelope cannot be serialized, which cannot happen for any
/// [`Packet`] value (all fields are JSON-representable).
#[must_use]
pub fn encode(packet: Packet) -> Vec<u8> {
    let mut record = serde_json::to_vec(&Envelope::from(packet))
        .expect("envelope fields are all JSON-representable");
    record.push(b'\n');
    record
}

/// Parses one complete record (without its terminator) into a packet.
///
/// # Errors
///
/// Errors if the record is malformed or matches no known packet kind. The
/// caller should log and discard the record, never tear down the connection.
pub fn decode(record: &[u8]) -> Result<Packet, DecodeError> {
    let envelope: Envelope = serde_json::from_slice(record).map_err(DecodeError::Json)?;
    envelope.into_packet()
}

/// Accumulates stream bytes and extracts complete newline-terminated
/// records.
///
/// The transport may deliver any number of records per read, or a record
/// split across reads; this buffer restores record boundaries.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete record, without its newline.
    ///
    /// Empty records (bare newlines) are skipped.
    pub fn next_record(&mut self) -> Option<Vec<u8>> {
        loop {
            let pos = self.buf.iter().position(|&b| b == b'\n')?;
            let mut record: Vec<u8> = self.buf.drain(..=pos).collect();
            record.pop();
            if record.iter().any(|b| !b.is_ascii_whitespace()) {
                return Some(record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::packet::DecodeError;

    use super::*;

    #[test]
    fn encode_terminates_with_newline() {
        let record = encode(Packet::Close {
            session_id: "ab12cd34".to_owned(),
            message: None,
        });
        assert_eq!(record.last(), Some(&b'\n'));
        assert_eq!(record.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn split_record_reassembles() {
        let record = encode(Packet::Close {
            session_id: "ab12cd34".to_owned(),
            message: None,
        });
        let (head, tail) = record.split_at(10);

        let mut lines = LineBuffer::new();
        lines.push(head);
        assert_eq!(lines.next_record(), None);
        lines.push(tail);
        let extracted = lines.next_record().unwrap();
        assert_matches!(decode(&extracted), Ok(Packet::Close { .. }));
        assert_eq!(lines.next_record(), None);
    }

    #[test]
    fn coalesced_records_split() {
        let mut bytes = encode(Packet::Close {
            session_id: "a".to_owned(),
            message: None,
        });
        bytes.extend_from_slice(&encode(Packet::Close {
            session_id: "b".to_owned(),
            message: None,
        }));

        let mut lines = LineBuffer::new();
        lines.push(&bytes);
        assert!(lines.next_record().is_some());
        assert!(lines.next_record().is_some());
        assert_eq!(lines.next_record(), None);
    }

    #[test]
    fn blank_lines_skipped() {
        let mut lines = LineBuffer::new();
        lines.push(b"\n  \n");
        assert_eq!(lines.next_record(), None);
    }

    #[test]
    fn malformed_record_is_an_error_not_a_panic() {
        assert_matches!(decode(b"{ not json"), Err(DecodeError::Json(_)));
    }
}
