//! Server and client configuration.

use std::path::PathBuf;

use arqnet_proto::{handshake::ServerPolicy, packet::Protocol};

/// Default bind/connect address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port.
pub const DEFAULT_PORT: u16 = 5005;

/// Certificate and key file locations for a TLS-enabled server.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    /// PEM certificate chain.
    pub cert: PathBuf,
    /// PEM private key.
    pub key: PathBuf,
}

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Clamping bounds and defaults applied to every handshake.
    pub policy: ServerPolicy,
    /// TLS material; `None` runs plain TCP.
    pub tls: Option<TlsPaths>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            policy: ServerPolicy::default(),
            tls: None,
        }
    }
}

/// Everything the client needs to connect.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Requested ARQ variant; the server may override it.
    pub protocol: Protocol,
    /// Requested message length cap; the server clamps it.
    pub max_chars: usize,
    /// Requested chunk size; the server clamps it.
    pub packet_size: usize,
    /// Requested window; applied as a local bound on top of whatever the
    /// server returns (the window itself is the server's decision and never
    /// goes out on the wire).
    pub window_size: usize,
    /// Whether to wrap the connection in TLS.
    pub ssl: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            protocol: Protocol::Gbn,
            max_chars: arqnet_proto::session::MAX_MESSAGE_CHARS,
            packet_size: arqnet_proto::session::MIN_PAYLOAD_LEN,
            window_size: arqnet_proto::session::MAX_WINDOW,
            ssl: false,
        }
    }
}
