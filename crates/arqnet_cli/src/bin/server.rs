//! The arqnet server binary.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use arqnet_io::{
    config::{ServerConfig, TlsPaths, DEFAULT_HOST, DEFAULT_PORT},
    server::Server,
};
use arqnet_proto::{
    handshake::ServerPolicy,
    packet::Protocol,
    session::{MAX_MESSAGE_CHARS, MAX_PAYLOAD_LEN, MAX_WINDOW},
};

/// Reliable-transport demo server: accepts arqnet sessions and reassembles
/// their messages.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Bind address.
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    /// Bind port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Variant applied when a client does not request one: `gbn` or `sr`.
    #[arg(long, default_value = "gbn", value_parser = parse_protocol)]
    protocol: Protocol,
    /// Cap on message length in characters.
    #[arg(long, default_value_t = MAX_MESSAGE_CHARS)]
    max_chars: usize,
    /// Cap on payload chunk size in characters.
    #[arg(long, default_value_t = MAX_PAYLOAD_LEN)]
    max_payload: usize,
    /// Window size handed to every session.
    #[arg(long, default_value_t = MAX_WINDOW)]
    window_size: usize,
    /// Wrap every connection in TLS; requires --cert and --key.
    #[arg(long, requires = "cert", requires = "key")]
    ssl: bool,
    /// PEM certificate chain.
    #[arg(long)]
    cert: Option<PathBuf>,
    /// PEM private key.
    #[arg(long)]
    key: Option<PathBuf>,
}

fn parse_protocol(value: &str) -> Result<Protocol, String> {
    value.parse().map_err(|_| {
        format!("`{value}` is not a protocol; use `gbn` or `sr`")
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let tls = args.ssl.then(|| TlsPaths {
        cert: args.cert.clone().expect("clap enforces --cert with --ssl"),
        key: args.key.clone().expect("clap enforces --key with --ssl"),
    });
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        policy: ServerPolicy {
            default_protocol: args.protocol,
            max_chars: args.max_chars,
            max_payload: args.max_payload,
            window: args.window_size,
        },
        tls,
    };

    let server = Server::bind(&config).context("server startup failed")?;
    server.serve();
    Ok(())
}
