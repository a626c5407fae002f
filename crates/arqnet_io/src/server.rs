//! The server: accept loop and per-connection workers.
//!
//! Each accepted connection gets its own thread, and that thread owns every
//! piece of its session — identity, parameters, receiver engine, counters —
//! by value. There is no shared session table and no cross-worker state; the
//! accept loop moves the connection into the worker and forgets about it.

use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread,
};

use rustls::{ServerConnection, StreamOwned};
use tracing::{debug, error, info, warn};

use arqnet_proto::{
    crypto::PayloadCipher,
    handshake::ServerPolicy,
    packet::Packet,
    receiver::{GbnReceiver, RecvOutput, SrReceiver},
    session::{derive_session_id, SessionParams, SessionState, SessionStats},
    validate::{Validator, Verdict},
};

use crate::{
    config::ServerConfig,
    framed::{Conn, FramedStream, RecvError},
    tls,
};

/// The server failed to start. Fatal.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Could not bind the listening socket.
    #[error("failed to bind {addr}")]
    Bind {
        /// The address that was requested.
        addr: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// TLS was requested but its material could not be loaded.
    #[error(transparent)]
    Tls(#[from] tls::TlsError),
}

/// A bound, ready-to-serve arqnet server.
pub struct Server {
    listener: TcpListener,
    policy: ServerPolicy,
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl Server {
    /// Binds the listening socket and loads TLS material if configured.
    ///
    /// # Errors
    ///
    /// Errors if the bind fails or the TLS material is unusable; both are
    /// fatal at startup.
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let tls = config
            .tls
            .as_ref()
            .map(|paths| tls::server_config(&paths.cert, &paths.key))
            .transpose()?;
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        info!(%addr, tls = tls.is_some(), "listening");
        Ok(Self {
            listener,
            policy: config.policy,
            tls,
        })
    }

    /// Address the server actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Errors if the socket refuses to report its address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, one worker thread per connection.
    pub fn serve(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let policy = self.policy;
                    let tls = self.tls.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("conn-{peer}"))
                        .spawn(move || run_worker(stream, peer, policy, tls));
                    if let Err(err) = spawned {
                        error!(%peer, error = %err, "failed to spawn worker");
                    }
                }
                Err(err) => warn!(error = %err, "accept failed"),
            }
        }
    }
}

fn run_worker(
    stream: TcpStream,
    peer: SocketAddr,
    policy: ServerPolicy,
    tls: Option<Arc<rustls::ServerConfig>>,
) {
    let conn = match tls {
        Some(config) => match ServerConnection::new(config) {
            Ok(conn) => Conn::TlsServer(Box::new(StreamOwned::new(conn, stream))),
            Err(err) => {
                error!(%peer, error = %err, "TLS session setup failed");
                return;
            }
        },
        None => Conn::Plain(stream),
    };

    let mut worker = Worker {
        framed: FramedStream::new(conn),
        peer,
        policy,
        state: SessionState::Listen,
        session: None,
    };
    match worker.run() {
        Ok(()) => {}
        Err(RecvError::Disconnected) => worker.on_disconnect(),
        Err(err) => error!(%peer, error = %err, "worker failed"),
    }
}

/// Everything one session needs once the handshake completes.
struct Established {
    id: String,
    validator: Validator,
    engine: Engine,
    stats: SessionStats,
}

enum Engine {
    Gbn(GbnReceiver),
    Sr(SrReceiver),
}

impl Engine {
    fn on_data(&mut self, verdict: &Verdict) -> RecvOutput {
        match self {
            Self::Gbn(recv) => recv.on_data(verdict),
            Self::Sr(recv) => recv.on_data(verdict),
        }
    }
}

/// One connection's worth of state, owned exclusively by its thread.
struct Worker {
    framed: FramedStream,
    peer: SocketAddr,
    policy: ServerPolicy,
    state: SessionState,
    /// Set on `syn` (the session exists from then on), completed into an
    /// engine when the handshake ack arrives.
    session: Option<(String, SessionParams)>,
}

impl Worker {
    fn run(&mut self) -> Result<(), RecvError> {
        let mut established: Option<Established> = None;

        loop {
            let packet = self.framed.recv()?;
            match self.state {
                SessionState::Listen => self.on_listen(packet)?,
                SessionState::SynRcvd => established = self.on_syn_rcvd(packet),
                SessionState::Established => {
                    let session = established
                        .as_mut()
                        .expect("established state always has a session");
                    self.state = on_established(&mut self.framed, session, packet)?;
                    if self.state == SessionState::Closing {
                        report_stats(&session.id, &session.stats);
                        self.state = SessionState::Closed;
                        return Ok(());
                    }
                }
                SessionState::Closing | SessionState::Closed => return Ok(()),
            }
        }
    }

    fn on_listen(&mut self, packet: Packet) -> Result<(), RecvError> {
        match packet {
            Packet::Syn {
                protocol,
                max_chars,
                packet_size,
            } => {
                let id = derive_session_id(&self.peer.to_string());
                let (params, reply) = self.policy.accept(protocol, max_chars, packet_size, &id);
                info!(
                    session = %id,
                    peer = %self.peer,
                    protocol = %params.protocol,
                    max_chars = params.max_chars,
                    payload_len = params.payload_len,
                    window = params.window,
                    "syn received, session created"
                );
                self.framed.send(reply)?;
                self.session = Some((id, params));
                self.state = SessionState::SynRcvd;
            }
            other => warn!(peer = %self.peer, kind = other.kind(), "expected syn"),
        }
        Ok(())
    }

    fn on_syn_rcvd(&mut self, packet: Packet) -> Option<Established> {
        let (id, params) = self
            .session
            .clone()
            .expect("syn-rcvd state always has a pending session");
        match packet {
            Packet::HandshakeAck { session_id, .. } if session_id == id => {
                info!(session = %id, "handshake complete, session established");
                self.state = SessionState::Established;
                let engine = match params.protocol {
                    arqnet_proto::packet::Protocol::Gbn => Engine::Gbn(GbnReceiver::new(&id)),
                    arqnet_proto::packet::Protocol::Sr => {
                        Engine::Sr(SrReceiver::new(&id, params.window))
                    }
                };
                Some(Established {
                    validator: Validator::new(PayloadCipher::default(), &id, params.payload_len),
                    engine,
                    stats: SessionStats::default(),
                    id,
                })
            }
            other => {
                warn!(session = %id, kind = other.kind(), "expected handshake ack");
                None
            }
        }
    }

    fn on_disconnect(&mut self) {
        // equivalent to a close
        if self.state == SessionState::Established {
            if let Some((id, _)) = &self.session {
                info!(session = %id, peer = %self.peer, "peer disconnected");
            }
        }
        self.state = SessionState::Closed;
    }
}

fn on_established(
    framed: &mut FramedStream,
    session: &mut Established,
    packet: Packet,
) -> Result<SessionState, RecvError> {
    match packet {
        Packet::Data { .. } => {
            let Some(verdict) = session.validator.verdict(&packet) else {
                return Ok(SessionState::Established);
            };
            match &verdict {
                // foreign records are discarded without any reply
                Verdict::Foreign => {
                    debug!(session = %session.id, "discarding record for another session");
                    return Ok(SessionState::Established);
                }
                Verdict::Intact { sequence, .. } => {
                    session.stats.packets_received += 1;
                    debug!(session = %session.id, %sequence, "data packet accepted");
                }
                Verdict::Corrupt { sequence, flaw, .. } => {
                    warn!(session = %session.id, %sequence, %flaw, "corrupt data packet");
                }
            }
            let output = session.engine.on_data(&verdict);
            if let Some(reply) = output.reply {
                session.stats.acks_sent += 1;
                framed.send(reply)?;
            }
            if let Some(message) = output.delivered {
                info!(session = %session.id, %message, "message delivered");
            }
            Ok(SessionState::Established)
        }
        Packet::Close { .. } => {
            info!(session = %session.id, "close received");
            Ok(SessionState::Closing)
        }
        other => {
            debug!(session = %session.id, kind = other.kind(), "ignoring unexpected packet");
            Ok(SessionState::Established)
        }
    }
}

fn report_stats(session: &str, stats: &SessionStats) {
    info!(
        session = %session,
        packets_received = stats.packets_received,
        acks_sent = stats.acks_sent,
        duration_secs = stats.elapsed().as_secs_f64(),
        "session closed"
    );
}
