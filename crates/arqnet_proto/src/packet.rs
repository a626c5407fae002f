//! The tagged packet sum and its wire envelope.
//!
//! On the wire every record is a flat key/value object; which keys are
//! present used to determine, implicitly, what kind of record it was. Here
//! that is re-architected as [`Packet`], a tagged sum — a single parser maps
//! each wire record to exactly one variant and rejects anything it does not
//! recognize at decode time.
//!
//! Data and control records carry an explicit `type` field. Handshake
//! records do not: a record with `protocol`/`max_chars` and no `session_id`
//! is a [`Packet::Syn`], a record with `session_id` and `status` is a
//! [`Packet::SynAck`], and a record with `session_id` and `message` (but no
//! `status`) is a [`Packet::HandshakeAck`].

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::seq::Seq;

/// ARQ protocol variant negotiated for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Go-Back-N: the receiver acknowledges whole messages; on any failure
    /// the sender retransmits the whole message.
    Gbn,
    /// Selective Repeat: every packet is acknowledged individually and only
    /// failed packets are retransmitted.
    Sr,
}

impl Protocol {
    /// Wire string of this variant.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gbn => "gbn",
            Self::Sr => "sr",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gbn" => Ok(Self::Gbn),
            "sr" => Ok(Self::Sr),
            _ => Err(DecodeError::BadProtocol {
                value: s.to_owned(),
            }),
        }
    }
}

/// Outcome carried by an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckStatus {
    /// The packet (SR) or message (GBN) was accepted.
    Ok,
    /// The packet or message was rejected; the sender should retransmit.
    Error,
}

impl AckStatus {
    /// Wire string of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }

    /// Whether this is [`AckStatus::Ok`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckStatus {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Self::Ok),
            "error" => Ok(Self::Error),
            _ => Err(DecodeError::BadStatus {
                value: s.to_owned(),
            }),
        }
    }
}

/// A single wire record, decoded into exactly one kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// First step of the handshake, client to server.
    Syn {
        /// Requested protocol variant; the server's default applies if
        /// absent.
        protocol: Option<Protocol>,
        /// Requested maximum message length in characters.
        max_chars: usize,
        /// Requested payload chunk size in characters.
        packet_size: usize,
    },
    /// Second step of the handshake, server to client. Carries the clamped
    /// parameters the session will actually use; the client must adopt them.
    SynAck {
        /// Always [`AckStatus::Ok`] on an accepted connection.
        status: AckStatus,
        /// Protocol variant the server chose.
        protocol: Protocol,
        /// Effective maximum message length.
        max_chars: usize,
        /// Effective payload chunk size.
        packet_size: usize,
        /// Effective window size, decided by the server.
        window_size: usize,
        /// Identifier of the newly created session.
        session_id: String,
    },
    /// Third step of the handshake, client to server. The server marks the
    /// session established on receipt.
    HandshakeAck {
        /// Session being confirmed.
        session_id: String,
        /// Human-readable confirmation.
        message: String,
    },
    /// One payload chunk of a segmented message.
    Data {
        /// Session this chunk belongs to.
        session_id: String,
        /// Per-session monotonic sequence number of this chunk.
        sequence: Seq,
        /// Number of chunks in the message this chunk belongs to.
        total_packets: usize,
        /// Whether this chunk is the final one of its message.
        is_last: bool,
        /// Sealed payload (see [`crate::crypto`]).
        data: String,
        /// Protocol variant the sender is running.
        protocol: Protocol,
        /// Integrity digest over the cleartext payload.
        checksum: String,
        /// Wall-clock send time in seconds since the epoch. Informational
        /// only; sequence numbers are ground truth.
        timestamp: Option<f64>,
    },
    /// Acknowledgement of one packet (SR) or one whole message (GBN).
    Ack {
        /// Session this acknowledgement belongs to.
        session_id: String,
        /// Acknowledged sequence number. For GBN this is the sequence of the
        /// message's final chunk.
        sequence: Seq,
        /// Accept or reject.
        status: AckStatus,
        /// For a GBN final ack: the reassembled cleartext echoed back. For a
        /// reject: a human-readable reason.
        message: Option<String>,
    },
    /// Session teardown.
    Close {
        /// Session being closed.
        session_id: String,
        /// Optional farewell.
        message: Option<String>,
    },
}

impl Packet {
    /// Short name of this packet's kind, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Syn { .. } => "syn",
            Self::SynAck { .. } => "syn-ack",
            Self::HandshakeAck { .. } => "handshake-ack",
            Self::Data { .. } => "data",
            Self::Ack { .. } => "ack",
            Self::Close { .. } => "close",
        }
    }

    /// Session identifier carried by this packet, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Syn { .. } => None,
            Self::SynAck { session_id, .. }
            | Self::HandshakeAck { session_id, .. }
            | Self::Data { session_id, .. }
            | Self::Ack { session_id, .. }
            | Self::Close { session_id, .. } => Some(session_id),
        }
    }
}

/// Failed to map a wire record to a [`Packet`].
///
/// Decode errors are never fatal to a connection: the record is logged and
/// discarded, and the reader continues with the next line.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The record was not a well-formed JSON object.
    #[error("malformed record")]
    Json(#[source] serde_json::Error),
    /// The record carried a `type` this engine does not know.
    #[error("unknown record kind `{kind}`")]
    UnknownKind {
        /// The offending `type` value.
        kind: String,
    },
    /// A field required by the record's kind was absent.
    #[error("missing field `{field}`")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
    },
    /// The record had no `type` and none of the handshake shapes.
    #[error("record matches no known shape")]
    UnrecognizedShape,
    /// The `protocol` field held neither `gbn` nor `sr`.
    #[error("unknown protocol `{value}`")]
    BadProtocol {
        /// The offending value.
        value: String,
    },
    /// The `status` field held neither `ok` nor `error`.
    #[error("unknown status `{value}`")]
    BadStatus {
        /// The offending value.
        value: String,
    },
}

/// Flat wire form of a [`Packet`].
///
/// All fields are optional at this level; [`Envelope::into_packet`] enforces
/// which must be present for each kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Record kind discriminator; absent on handshake records.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_packets: Option<u64>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_last: Option<bool>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chars: Option<u64>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_size: Option<u64>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_size: Option<u64>,
    /// See [`Packet`] field docs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

fn require<T>(field: Option<T>, name: &'static str) -> Result<T, DecodeError> {
    field.ok_or(DecodeError::MissingField { field: name })
}

fn to_len(raw: u64) -> usize {
    usize::try_from(raw).unwrap_or(usize::MAX)
}

impl Envelope {
    /// Maps this wire record to exactly one [`Packet`] kind.
    ///
    /// # Errors
    ///
    /// Errors if the record carries an unknown `type`, matches no handshake
    /// shape, or is missing a field its kind requires.
    pub fn into_packet(self) -> Result<Packet, DecodeError> {
        match self.kind.as_deref() {
            Some("data") => Ok(Packet::Data {
                session_id: require(self.session_id, "session_id")?,
                sequence: Seq(require(self.sequence, "sequence")?),
                total_packets: to_len(require(self.total_packets, "total_packets")?),
                is_last: require(self.is_last, "is_last")?,
                data: require(self.data, "data")?,
                protocol: require(self.protocol, "protocol")?.parse()?,
                checksum: require(self.checksum, "checksum")?,
                timestamp: self.timestamp,
            }),
            Some("ack") => Ok(Packet::Ack {
                session_id: require(self.session_id, "session_id")?,
                sequence: Seq(require(self.sequence, "sequence")?),
                status: require(self.status, "status")?.parse()?,
                message: self.message,
            }),
            Some("close") => Ok(Packet::Close {
                session_id: require(self.session_id, "session_id")?,
                message: self.message,
            }),
            Some(other) => Err(DecodeError::UnknownKind {
                kind: other.to_owned(),
            }),
            // Handshake records carry no `type`; which keys are present
            // decides the kind.
            None => {
                if self.session_id.is_none() && self.max_chars.is_some() {
                    Ok(Packet::Syn {
                        protocol: self.protocol.as_deref().map(str::parse).transpose()?,
                        max_chars: to_len(require(self.max_chars, "max_chars")?),
                        packet_size: to_len(require(self.packet_size, "packet_size")?),
                    })
                } else if self.status.is_some() {
                    Ok(Packet::SynAck {
                        status: require(self.status, "status")?.parse()?,
                        protocol: require(self.protocol, "protocol")?.parse()?,
                        max_chars: to_len(require(self.max_chars, "max_chars")?),
                        packet_size: to_len(require(self.packet_size, "packet_size")?),
                        window_size: to_len(require(self.window_size, "window_size")?),
                        session_id: require(self.session_id, "session_id")?,
                    })
                } else if self.message.is_some() {
                    Ok(Packet::HandshakeAck {
                        session_id: require(self.session_id, "session_id")?,
                        message: require(self.message, "message")?,
                    })
                } else {
                    Err(DecodeError::UnrecognizedShape)
                }
            }
        }
    }
}

impl From<Packet> for Envelope {
    fn from(packet: Packet) -> Self {
        match packet {
            Packet::Syn {
                protocol,
                max_chars,
                packet_size,
            } => Self {
                protocol: protocol.map(|p| p.as_str().to_owned()),
                max_chars: Some(max_chars as u64),
                packet_size: Some(packet_size as u64),
                ..Self::default()
            },
            Packet::SynAck {
                status,
                protocol,
                max_chars,
                packet_size,
                window_size,
                session_id,
            } => Self {
                status: Some(status.as_str().to_owned()),
                protocol: Some(protocol.as_str().to_owned()),
                max_chars: Some(max_chars as u64),
                packet_size: Some(packet_size as u64),
                window_size: Some(window_size as u64),
                session_id: Some(session_id),
                ..Self::default()
            },
            Packet::HandshakeAck {
                session_id,
                message,
            } => Self {
                session_id: Some(session_id),
                message: Some(message),
                ..Self::default()
            },
            Packet::Data {
                session_id,
                sequence,
                total_packets,
                is_last,
                data,
                protocol,
                checksum,
                timestamp,
            } => Self {
                kind: Some("data".to_owned()),
                session_id: Some(session_id),
                sequence: Some(sequence.0),
                total_packets: Some(total_packets as u64),
                is_last: Some(is_last),
                data: Some(data),
                protocol: Some(protocol.as_str().to_owned()),
                checksum: Some(checksum),
                timestamp,
                ..Self::default()
            },
            Packet::Ack {
                session_id,
                sequence,
                status,
                message,
            } => Self {
                kind: Some("ack".to_owned()),
                session_id: Some(session_id),
                sequence: Some(sequence.0),
                status: Some(status.as_str().to_owned()),
                message,
                ..Self::default()
            },
            Packet::Close {
                session_id,
                message,
            } => Self {
                kind: Some("close".to_owned()),
                session_id: Some(session_id),
                message,
                ..Self::default()
            },
        }
    }
}
