//! The client driver.
//!
//! Connects, performs the three-way handshake, and pushes the sans-IO sender
//! engines along: writing the chunks they hand out, feeding the acks back
//! in, and sleeping only as long as the engines say there is nothing better
//! to do.

use std::{
    io,
    net::TcpStream,
    time::{Duration, Instant},
};

use rustls::{pki_types::ServerName, ClientConnection, StreamOwned};
use tracing::{debug, info, warn};

use arqnet_proto::{
    crypto::PayloadCipher,
    fault::{FaultMode, FaultPlan},
    handshake::{self, HandshakeError, Negotiated},
    packet::Packet,
    sender::{
        segment, GbnSender, PacketForge, RetryVerdict, SrAckOutcome, SrAction, SrSender,
        GBN_ACK_TIMEOUT, MAX_ATTEMPTS,
    },
    session::SessionStats,
    Seq,
};

use crate::{
    config::ClientConfig,
    framed::{Conn, FramedStream, RecvError},
    tls,
};

/// Granularity of the SR ack poll: never block longer than this between
/// looks at the sender's timers.
pub const ACK_POLL: Duration = Duration::from_millis(100);

/// The client could not connect, negotiate or keep the session running.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// TCP connect failed.
    #[error("failed to connect to {addr}")]
    Connect {
        /// The address that was dialed.
        addr: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The configured host is not usable as a TLS server name.
    #[error("invalid server name `{host}`")]
    ServerName {
        /// The offending host string.
        host: String,
    },
    /// TLS session setup failed.
    #[error("TLS session setup failed")]
    Tls(#[from] rustls::Error),
    /// The server's handshake reply was missing or wrong.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// The server did not reply to the `syn` in time.
    #[error("server did not answer the handshake")]
    HandshakeTimeout,
    /// Receiving from the server failed.
    #[error(transparent)]
    Recv(#[from] RecvError),
    /// Writing to the server failed.
    #[error("stream write failed")]
    Io(#[from] io::Error),
    /// Messages must contain at least one character.
    #[error("message is empty")]
    EmptyMessage,
    /// The server closed the session mid-message.
    #[error("server closed the session")]
    ClosedByPeer,
}

/// How one message send ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The peer confirmed the whole message.
    Delivered {
        /// Attempts it took, 1-based.
        attempts: u8,
    },
    /// The retry budget ran out; the message was abandoned. The session's
    /// sequence counter advanced regardless.
    Abandoned {
        /// Attempts made.
        attempts: u8,
    },
}

/// A connected, handshaken client session.
pub struct Client {
    framed: FramedStream,
    negotiated: Negotiated,
    effective_window: usize,
    forge: PacketForge,
    faults: FaultPlan,
    stats: SessionStats,
    next_seq: Seq,
    messages_attempted: u64,
}

impl Client {
    /// Connects and performs the three-way handshake.
    ///
    /// # Errors
    ///
    /// Errors if the connection, TLS setup or negotiation fails.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let addr = format!("{}:{}", config.host, config.port);
        let socket = TcpStream::connect(&addr).map_err(|source| ClientError::Connect {
            addr: addr.clone(),
            source,
        })?;
        let conn = if config.ssl {
            let name = ServerName::try_from(config.host.clone()).map_err(|_| {
                ClientError::ServerName {
                    host: config.host.clone(),
                }
            })?;
            let tls = ClientConnection::new(tls::client_config(), name)?;
            Conn::TlsClient(Box::new(StreamOwned::new(tls, socket)))
        } else {
            Conn::Plain(socket)
        };
        let mut framed = FramedStream::new(conn);
        info!(%addr, tls = config.ssl, "connected");

        framed.send(handshake::offer(
            config.protocol,
            config.max_chars,
            config.packet_size,
        ))?;
        let reply = framed
            .recv_deadline(Instant::now() + GBN_ACK_TIMEOUT)?
            .ok_or(ClientError::HandshakeTimeout)?;
        let negotiated = handshake::adopt(reply, config.protocol)?;
        framed.send(handshake::confirm(&negotiated.session_id))?;

        if negotiated.protocol_changed {
            warn!(
                protocol = %negotiated.params.protocol,
                "server chose a different protocol; adopting it"
            );
        }
        info!(
            session = %negotiated.session_id,
            protocol = %negotiated.params.protocol,
            max_chars = negotiated.params.max_chars,
            payload_len = negotiated.params.payload_len,
            window = negotiated.params.window,
            "handshake complete"
        );

        let effective_window = negotiated.params.window.min(config.window_size.max(1));
        let forge = PacketForge::new(
            PayloadCipher::default(),
            &negotiated.session_id,
            negotiated.params.protocol,
        );
        Ok(Self {
            framed,
            negotiated,
            effective_window,
            forge,
            faults: FaultPlan::none(),
            stats: SessionStats::default(),
            next_seq: Seq(0),
            messages_attempted: 0,
        })
    }

    /// The parameters and identity this session runs under.
    #[must_use]
    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }

    /// The session counters so far.
    #[must_use]
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Arms a one-shot fault against a chunk of the *next* message.
    pub fn arm_fault(&mut self, chunk_index: usize, mode: FaultMode) {
        self.faults.arm(self.messages_attempted, chunk_index, mode);
    }

    /// Segments, protects and sends one message, retrying per the
    /// negotiated variant's rules.
    ///
    /// Messages longer than the negotiated cap are truncated with a warning.
    /// The session sequence counter advances by the message's chunk count
    /// whether or not the message was confirmed.
    ///
    /// # Errors
    ///
    /// Errors if the message is empty or the connection fails; a message the
    /// peer kept rejecting is not an error but [`MessageOutcome::Abandoned`].
    pub fn send_message(&mut self, text: &str) -> Result<MessageOutcome, ClientError> {
        if text.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let max_chars = self.negotiated.params.max_chars;
        let text: String = if text.chars().count() > max_chars {
            warn!(max_chars, "message truncated to the negotiated cap");
            text.chars().take(max_chars).collect()
        } else {
            text.to_owned()
        };

        let chunks = segment(&text, self.negotiated.params.payload_len);
        let total = chunks.len();
        let message_index = self.messages_attempted;
        self.messages_attempted += 1;
        debug!(total_packets = total, "message segmented");

        let outcome = match self.negotiated.params.protocol {
            arqnet_proto::packet::Protocol::Gbn => self.send_gbn(chunks, message_index),
            arqnet_proto::packet::Protocol::Sr => self.send_sr(chunks, message_index),
        };
        // sequence numbers are never reused, even for abandoned messages
        self.next_seq += total as u64;

        if let Ok(MessageOutcome::Delivered { .. }) = &outcome {
            self.stats.messages_sent += 1;
        }
        outcome
    }

    /// Closes the session cleanly and hands back the final statistics.
    ///
    /// # Errors
    ///
    /// Errors if the `close` record cannot be written.
    pub fn close(mut self) -> Result<SessionStats, ClientError> {
        self.framed.send(Packet::Close {
            session_id: self.negotiated.session_id.clone(),
            message: Some("client disconnecting".to_owned()),
        })?;
        info!(session = %self.negotiated.session_id, "session closed");
        Ok(self.stats)
    }

    /// Writes one chunk, consulting the fault plan first.
    fn transmit_chunk(
        &mut self,
        message_index: u64,
        index: usize,
        sequence: Seq,
        payload: &str,
        total: usize,
        is_last: bool,
    ) -> Result<(), ClientError> {
        let injected = self.faults.fire(message_index, index);
        self.stats.packets_sent += 1;
        match injected {
            Some(FaultMode::Lose) => {
                info!(%sequence, "fault: suppressing this chunk's write");
                Ok(())
            }
            Some(FaultMode::Corrupt) => {
                info!(%sequence, "fault: corrupting this chunk's checksum");
                let packet = self.forge.data(sequence, payload, total, is_last, true);
                Ok(self.framed.send(packet)?)
            }
            None => {
                let packet = self.forge.data(sequence, payload, total, is_last, false);
                debug!(%sequence, is_last, "chunk sent");
                Ok(self.framed.send(packet)?)
            }
        }
    }

    fn send_gbn(
        &mut self,
        chunks: Vec<String>,
        message_index: u64,
    ) -> Result<MessageOutcome, ClientError> {
        let mut sender = GbnSender::new(self.next_seq, chunks);
        let total = sender.total_packets();

        loop {
            // the whole message goes out back-to-back
            for t in sender.transmits() {
                self.transmit_chunk(message_index, t.index, t.sequence, t.payload, total, t.is_last)?;
            }

            // then exactly one aggregate ack decides its fate
            match self.await_final_ack(&sender)? {
                FinalAck::Confirmed => {
                    self.stats.packets_confirmed += 1;
                    info!(attempts = sender.attempt(), "message confirmed");
                    return Ok(MessageOutcome::Delivered {
                        attempts: sender.attempt(),
                    });
                }
                FinalAck::Rejected => warn!("message rejected by the receiver"),
                FinalAck::TimedOut => warn!("no aggregate ack before the timeout"),
            }
            match sender.on_failure() {
                RetryVerdict::Retry { attempt } => {
                    info!(attempt, "retransmitting the whole message");
                }
                RetryVerdict::Abandon => {
                    warn!(attempts = MAX_ATTEMPTS, "message abandoned");
                    return Ok(MessageOutcome::Abandoned {
                        attempts: MAX_ATTEMPTS,
                    });
                }
            }
        }
    }

    fn await_final_ack(&mut self, sender: &GbnSender) -> Result<FinalAck, ClientError> {
        let deadline = Instant::now() + GBN_ACK_TIMEOUT;
        loop {
            match self.framed.recv_deadline(deadline)? {
                None => return Ok(FinalAck::TimedOut),
                Some(Packet::Ack {
                    sequence, status, ..
                }) if sender.ack_matches(sequence) => {
                    return Ok(if status.is_ok() {
                        FinalAck::Confirmed
                    } else {
                        FinalAck::Rejected
                    });
                }
                Some(Packet::Close { .. }) => return Err(ClientError::ClosedByPeer),
                Some(other) => {
                    debug!(kind = other.kind(), "ignoring while awaiting the final ack");
                }
            }
        }
    }

    fn send_sr(
        &mut self,
        chunks: Vec<String>,
        message_index: u64,
    ) -> Result<MessageOutcome, ClientError> {
        let mut sender = SrSender::new(self.next_seq, chunks, self.effective_window, Instant::now());
        let total = sender.total_packets();

        loop {
            let now = Instant::now();
            match sender.next_action(now) {
                SrAction::Done => {
                    info!(attempts = sender.attempt(), "message confirmed");
                    return Ok(MessageOutcome::Delivered {
                        attempts: sender.attempt(),
                    });
                }
                SrAction::DeadlineExpired => match sender.on_deadline(now) {
                    RetryVerdict::Retry { attempt } => {
                        warn!(attempt, "message deadline expired, retrying");
                    }
                    RetryVerdict::Abandon => {
                        warn!(attempts = MAX_ATTEMPTS, "message abandoned");
                        return Ok(MessageOutcome::Abandoned {
                            attempts: MAX_ATTEMPTS,
                        });
                    }
                },
                SrAction::Transmit(t) => {
                    if t.retransmit {
                        info!(sequence = %t.sequence, "retransmitting chunk");
                    }
                    self.transmit_chunk(
                        message_index,
                        t.index,
                        t.sequence,
                        sender.payload(t.index),
                        total,
                        t.is_last,
                    )?;
                    sender.on_transmitted(t.index, Instant::now());
                }
                SrAction::Wait(until) => {
                    let wait = until.saturating_duration_since(now).min(ACK_POLL);
                    match self.framed.try_recv(wait)? {
                        Some(Packet::Ack {
                            sequence, status, ..
                        }) => match sender.handle_ack(sequence, status, Instant::now()) {
                            SrAckOutcome::Confirmed { sequence } => {
                                self.stats.packets_confirmed += 1;
                                debug!(%sequence, cwnd = sender.cwnd(), "chunk confirmed");
                            }
                            SrAckOutcome::Nacked { sequence } => {
                                warn!(%sequence, "chunk rejected, retransmitting");
                            }
                            SrAckOutcome::Stale => debug!(%sequence, "stale ack"),
                        },
                        Some(Packet::Close { .. }) => return Err(ClientError::ClosedByPeer),
                        Some(other) => {
                            debug!(kind = other.kind(), "ignoring unexpected packet");
                        }
                        None => {}
                    }
                }
            }
        }
    }
}

/// How the wait for a GBN aggregate ack resolved.
enum FinalAck {
    Confirmed,
    Rejected,
    TimedOut,
}
