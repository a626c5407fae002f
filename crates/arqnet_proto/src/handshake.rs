//! Three-way session negotiation.
//!
//! ```text
//! client                      server
//!   | -- syn {proto, M, P} ---> |   creates session, clamps parameters
//!   | <- syn-ack {ok, params} - |
//!   | -- handshake-ack -------> |   marks session established
//! ```
//!
//! The server decides the effective parameters — `max_chars` clamped to the
//! hard cap, `packet_size` clamped into its legal range, `window_size`
//! bounded by the server's maximum — and the client must adopt every
//! returned value, including a protocol different from the one it asked for.

use crate::{
    packet::{AckStatus, Packet, Protocol},
    session::{SessionParams, MAX_MESSAGE_CHARS, MAX_PAYLOAD_LEN, MAX_WINDOW, MIN_PAYLOAD_LEN},
};

/// Confirmation text carried by the final handshake ack.
pub const HANDSHAKE_DONE: &str = "Handshake completo";

/// Server-side clamping bounds applied to every incoming offer.
#[derive(Debug, Clone, Copy)]
pub struct ServerPolicy {
    /// Variant applied when the client does not request one.
    pub default_protocol: Protocol,
    /// Cap on message length; itself capped at [`MAX_MESSAGE_CHARS`].
    pub max_chars: usize,
    /// Cap on payload chunk size; itself capped at [`MAX_PAYLOAD_LEN`].
    pub max_payload: usize,
    /// The window size handed to every session; capped at [`MAX_WINDOW`].
    pub window: usize,
}

impl Default for ServerPolicy {
    fn default() -> Self {
        Self {
            default_protocol: Protocol::Gbn,
            max_chars: MAX_MESSAGE_CHARS,
            max_payload: MAX_PAYLOAD_LEN,
            window: MAX_WINDOW,
        }
    }
}

impl ServerPolicy {
    /// Accepts a client offer, producing the parameters the session will run
    /// under and the `syn-ack` to send back.
    #[must_use]
    pub fn accept(
        &self,
        protocol: Option<Protocol>,
        max_chars: usize,
        packet_size: usize,
        session_id: &str,
    ) -> (SessionParams, Packet) {
        let params = SessionParams {
            protocol: protocol.unwrap_or(self.default_protocol),
            max_chars: max_chars.clamp(1, self.max_chars.min(MAX_MESSAGE_CHARS)),
            payload_len: packet_size
                .clamp(MIN_PAYLOAD_LEN, self.max_payload.min(MAX_PAYLOAD_LEN)),
            window: self.window.clamp(1, MAX_WINDOW),
        };
        let reply = Packet::SynAck {
            status: AckStatus::Ok,
            protocol: params.protocol,
            max_chars: params.max_chars,
            packet_size: params.payload_len,
            window_size: params.window,
            session_id: session_id.to_owned(),
        };
        (params, reply)
    }
}

/// The server refused the connection or replied out of protocol.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandshakeError {
    /// The `syn-ack` carried `status = error`.
    #[error("server refused the connection")]
    Refused,
    /// The reply to the `syn` was not a `syn-ack` at all.
    #[error("expected a syn-ack, got `{kind}`")]
    UnexpectedReply {
        /// Kind of the packet actually received.
        kind: &'static str,
    },
}

/// Everything the client learns from a completed handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Parameters the session will run under.
    pub params: SessionParams,
    /// Identifier of the session, opaque from here on.
    pub session_id: String,
    /// Whether the server picked a different variant than the client asked
    /// for (the server's choice is already in `params`).
    pub protocol_changed: bool,
}

/// Builds the opening `syn` for a client offer.
#[must_use]
pub fn offer(protocol: Protocol, max_chars: usize, packet_size: usize) -> Packet {
    Packet::Syn {
        protocol: Some(protocol),
        max_chars,
        packet_size,
    }
}

/// Interprets the server's reply to a `syn`, adopting every returned value.
///
/// # Errors
///
/// Errors if the reply is not an accepting `syn-ack`.
pub fn adopt(reply: Packet, requested: Protocol) -> Result<Negotiated, HandshakeError> {
    match reply {
        Packet::SynAck {
            status: AckStatus::Ok,
            protocol,
            max_chars,
            packet_size,
            window_size,
            session_id,
        } => Ok(Negotiated {
            params: SessionParams {
                protocol,
                max_chars,
                payload_len: packet_size,
                window: window_size,
            },
            session_id,
            protocol_changed: protocol != requested,
        }),
        Packet::SynAck {
            status: AckStatus::Error,
            ..
        } => Err(HandshakeError::Refused),
        other => Err(HandshakeError::UnexpectedReply { kind: other.kind() }),
    }
}

/// Builds the final handshake ack confirming `session_id`.
#[must_use]
pub fn confirm(session_id: &str) -> Packet {
    Packet::HandshakeAck {
        session_id: session_id.to_owned(),
        message: HANDSHAKE_DONE.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn legal_offer_is_unchanged() {
        let policy = ServerPolicy::default();
        let (params, _) = policy.accept(Some(Protocol::Sr), 20, 4, "ab12cd34");
        assert_eq!(
            params,
            SessionParams {
                protocol: Protocol::Sr,
                max_chars: 20,
                payload_len: 4,
                window: 5,
            }
        );
    }

    #[test]
    fn oversized_offer_is_clamped() {
        let policy = ServerPolicy::default();
        let (params, reply) = policy.accept(Some(Protocol::Gbn), 100, 64, "ab12cd34");
        assert_eq!(params.max_chars, MAX_MESSAGE_CHARS);
        assert_eq!(params.payload_len, MAX_PAYLOAD_LEN);
        assert_matches!(
            reply,
            Packet::SynAck {
                max_chars: 30,
                packet_size: 8,
                ..
            }
        );
    }

    #[test]
    fn undersized_packet_size_is_clamped_up() {
        let policy = ServerPolicy::default();
        let (params, _) = policy.accept(Some(Protocol::Gbn), 30, 1, "ab12cd34");
        assert_eq!(params.payload_len, MIN_PAYLOAD_LEN);
    }

    #[test]
    fn missing_protocol_takes_server_default() {
        let policy = ServerPolicy {
            default_protocol: Protocol::Sr,
            ..ServerPolicy::default()
        };
        let (params, _) = policy.accept(None, 30, 4, "ab12cd34");
        assert_eq!(params.protocol, Protocol::Sr);
    }

    #[test]
    fn both_peers_agree_after_adoption() {
        let policy = ServerPolicy::default();
        let (server_params, reply) = policy.accept(Some(Protocol::Sr), 30, 4, "ab12cd34");

        let negotiated = adopt(reply, Protocol::Sr).unwrap();
        assert_eq!(negotiated.params, server_params);
        assert_eq!(negotiated.session_id, "ab12cd34");
        assert!(!negotiated.protocol_changed);
    }

    #[test]
    fn client_adopts_server_protocol_choice() {
        let policy = ServerPolicy {
            default_protocol: Protocol::Gbn,
            ..ServerPolicy::default()
        };
        // the server ignores the requested variant in favour of its own
        let (_, reply) = policy.accept(Some(Protocol::Gbn), 30, 4, "ab12cd34");
        let negotiated = adopt(reply, Protocol::Sr).unwrap();
        assert_eq!(negotiated.params.protocol, Protocol::Gbn);
        assert!(negotiated.protocol_changed);
    }

    #[test]
    fn data_reply_is_rejected() {
        let reply = Packet::Close {
            session_id: "x".to_owned(),
            message: None,
        };
        assert_matches!(
            adopt(reply, Protocol::Gbn),
            Err(HandshakeError::UnexpectedReply { kind: "close" })
        );
    }
}
