//! Session identity, negotiated parameters, lifecycle and statistics.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};

use crate::packet::Protocol;

/// Hard cap on message length in characters.
pub const MAX_MESSAGE_CHARS: usize = 30;

/// Smallest negotiable payload chunk size in characters.
pub const MIN_PAYLOAD_LEN: usize = 4;

/// Largest negotiable payload chunk size in characters.
pub const MAX_PAYLOAD_LEN: usize = 8;

/// Hard cap on the sliding-window size.
pub const MAX_WINDOW: usize = 5;

/// Parameters a session runs under, fixed at handshake time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    /// Negotiated ARQ variant.
    pub protocol: Protocol,
    /// Maximum message length in characters, ≤ [`MAX_MESSAGE_CHARS`].
    pub max_chars: usize,
    /// Payload chunk size in characters, within
    /// [`MIN_PAYLOAD_LEN`]..=[`MAX_PAYLOAD_LEN`].
    pub payload_len: usize,
    /// Window size, 1..=[`MAX_WINDOW`]. The server decides this.
    pub window: usize,
}

/// Lifecycle of a session on the receiving side.
///
/// ```text
/// LISTEN -> SYN_RCVD -> ESTABLISHED -> CLOSING -> CLOSED
/// ```
///
/// `syn` moves LISTEN to SYN_RCVD (the syn-ack goes out); the final
/// handshake ack moves SYN_RCVD to ESTABLISHED; data and acks keep the
/// session in ESTABLISHED; `close` — or disconnection of the underlying
/// stream, which is equivalent — drives it through CLOSING to CLOSED, at
/// which point statistics are emitted exactly once and the session is freed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a `syn`.
    #[default]
    Listen,
    /// `syn` seen, `syn-ack` sent, waiting for the final handshake ack.
    SynRcvd,
    /// Handshake complete; data and acks flow.
    Established,
    /// `close` seen; statistics being emitted.
    Closing,
    /// Session destroyed.
    Closed,
}

/// Cumulative per-session counters, reported when the session closes.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Data packets written to the stream (including retransmissions and
    /// chunks the fault hook suppressed — the sender believes it sent them).
    pub packets_sent: u64,
    /// `ack{ok}` records received (per packet in SR, per message in GBN).
    pub packets_confirmed: u64,
    /// Messages fully confirmed.
    pub messages_sent: u64,
    /// Data packets received intact.
    pub packets_received: u64,
    /// Acknowledgements emitted.
    pub acks_sent: u64,
    /// When the session started.
    pub started: Instant,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            packets_sent: 0,
            packets_confirmed: 0,
            messages_sent: 0,
            packets_received: 0,
            acks_sent: 0,
            started: Instant::now(),
        }
    }
}

impl SessionStats {
    /// How long the session has been up.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Confirmed-to-sent ratio in percent, 0 if nothing was sent.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                self.packets_confirmed as f64 / self.packets_sent as f64 * 100.0
            }
        }
    }
}

/// Derives an opaque 8-hex-char session identifier from the peer endpoint
/// and the wall clock.
///
/// Both sides treat the identifier as opaque after the handshake; the
/// derivation only has to make concurrent sessions distinguishable.
#[must_use]
pub fn derive_session_id(peer: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut hasher = Sha1::new();
    hasher.update(peer.as_bytes());
    hasher.update(nanos.to_le_bytes());
    let out = hasher.finalize();
    let mut id = String::with_capacity(8);
    for byte in &out[..4] {
        use std::fmt::Write;
        let _ = write!(id, "{byte:02x}");
    }
    id
}
