//! The GBN and SR sender window engines.
//!
//! Both engines are pure state machines: they never touch a socket and never
//! sleep. Every time-dependent operation takes `now: Instant`, transmissions
//! are returned as instructions for the IO driver to act on, and the driver
//! decides how long to actually wait by asking for the next deadline. This
//! mirrors how the receiving side is driven (see [`crate::receiver`]).
//!
//! The two engines differ in their retransmission unit:
//!
//! - [`GbnSender`]: the whole message. All chunks go out back-to-back, one
//!   aggregate ack (keyed on the final chunk's sequence) confirms or rejects
//!   the lot, and a reject or timeout retransmits everything.
//! - [`SrSender`]: one chunk. A window `[B, B+W)` slides over the chunks,
//!   each in-flight chunk runs its own resend timer, a nack re-arms just
//!   that chunk, and the base advances past the contiguous acked run at the
//!   front.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::trace;

use crate::{
    crypto::PayloadCipher,
    packet::{AckStatus, Packet, Protocol},
    seq::Seq,
};

/// How long a GBN sender waits for the aggregate ack of a message.
pub const GBN_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an SR chunk may remain unacknowledged before retransmission.
pub const SR_CHUNK_TIMEOUT: Duration = Duration::from_secs(2);

/// Overall bound on one SR message attempt.
pub const SR_MESSAGE_DEADLINE: Duration = Duration::from_secs(30);

/// How many attempts a message gets before it is abandoned.
pub const MAX_ATTEMPTS: u8 = 3;

/// Cuts a message into payload-sized chunks of characters, in order.
///
/// Reassembling the returned chunks by concatenation yields the original
/// message exactly.
#[must_use]
pub fn segment(message: &str, payload_len: usize) -> Vec<String> {
    assert!(payload_len > 0);
    let chars: Vec<char> = message.chars().collect();
    chars
        .chunks(payload_len)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Whether a failed message gets another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Retransmit; `attempt` is the new 1-based attempt number.
    Retry {
        /// The attempt about to start.
        attempt: u8,
    },
    /// The retry budget is spent. The message is abandoned, but the session
    /// sequence counter has already advanced past it.
    Abandon,
}

/// Didactic slow-start ramp, local to the sender and invisible on the wire.
///
/// The effective window of each burst is `min(cwnd, W)`. A fully
/// acknowledged burst grows `cwnd` by one up to `W`; any failure collapses
/// it back to one.
#[derive(Debug, Clone, Copy)]
pub struct Cwnd {
    cwnd: usize,
    cap: usize,
}

impl Cwnd {
    /// Creates a ramp capped at the negotiated window size.
    #[must_use]
    pub const fn new(cap: usize) -> Self {
        Self { cwnd: 1, cap }
    }

    /// Current congestion window.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.cwnd
    }

    /// Grows the window after a fully acknowledged burst.
    pub fn on_burst_ok(&mut self) {
        self.cwnd = (self.cwnd + 1).min(self.cap);
    }

    /// Collapses the window after any failed burst.
    pub fn on_failure(&mut self) {
        self.cwnd = 1;
    }
}

/// Builds outgoing data packets for one session: digest over the cleartext,
/// then the sealed payload, then the envelope.
#[derive(Debug, Clone)]
pub struct PacketForge {
    cipher: PayloadCipher,
    session_id: String,
    protocol: Protocol,
}

impl PacketForge {
    /// Creates a forge for the given session.
    #[must_use]
    pub fn new(cipher: PayloadCipher, session_id: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            cipher,
            session_id: session_id.into(),
            protocol,
        }
    }

    /// Builds one data packet. With `corrupt_digest` the checksum field is
    /// replaced by a deliberately wrong value while the sealed payload stays
    /// intact (the fault hook's `corrupt` mode).
    #[must_use]
    pub fn data(
        &self,
        sequence: Seq,
        cleartext: &str,
        total_packets: usize,
        is_last: bool,
        corrupt_digest: bool,
    ) -> Packet {
        let mut digest = crate::checksum::digest(cleartext.as_bytes());
        if corrupt_digest {
            digest = mangle(&digest);
        }
        Packet::Data {
            session_id: self.session_id.clone(),
            sequence,
            total_packets,
            is_last,
            data: self.cipher.seal(cleartext.as_bytes()),
            protocol: self.protocol,
            checksum: digest,
            timestamp: Some(unix_now()),
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Produces a digest value that is guaranteed not to verify.
fn mangle(digest: &str) -> String {
    let mut out: String = digest.to_owned();
    let replacement = if out.starts_with('0') { "f" } else { "0" };
    out.replace_range(..1, replacement);
    out
}

/// One chunk the GBN engine wants written to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GbnTransmit<'a> {
    /// Zero-based position of the chunk within its message.
    pub index: usize,
    /// Wire sequence number.
    pub sequence: Seq,
    /// Cleartext payload.
    pub payload: &'a str,
    /// Whether this is the message's final chunk.
    pub is_last: bool,
}

/// Go-Back-N sender state for one message.
///
/// The only durable state is the attempt counter: on any failure the whole
/// message is the retransmission unit, so there is nothing per-chunk to
/// track. The aggregate ack is keyed on the final chunk's sequence number.
#[derive(Debug)]
pub struct GbnSender {
    base: Seq,
    chunks: Vec<String>,
    attempt: u8,
}

impl GbnSender {
    /// Creates the engine for one segmented message.
    ///
    /// # Panics
    ///
    /// Panics if `chunks` is empty; empty messages are rejected before
    /// segmentation.
    #[must_use]
    pub fn new(base: Seq, chunks: Vec<String>) -> Self {
        assert!(!chunks.is_empty());
        Self {
            base,
            chunks,
            attempt: 1,
        }
    }

    /// Number of chunks in this message.
    #[must_use]
    pub fn total_packets(&self) -> usize {
        self.chunks.len()
    }

    /// Sequence number of the final chunk, which keys the aggregate ack.
    #[must_use]
    pub fn final_seq(&self) -> Seq {
        self.base + (self.chunks.len() as u64 - 1)
    }

    /// Current 1-based attempt number.
    #[must_use]
    pub const fn attempt(&self) -> u8 {
        self.attempt
    }

    /// The full back-to-back burst for the current attempt.
    pub fn transmits(&self) -> impl Iterator<Item = GbnTransmit<'_>> {
        let base = self.base;
        let last = self.chunks.len() - 1;
        self.chunks
            .iter()
            .enumerate()
            .map(move |(index, payload)| GbnTransmit {
                index,
                sequence: base + index as u64,
                payload,
                is_last: index == last,
            })
    }

    /// Whether an ack with this sequence is the aggregate ack of this
    /// message.
    #[must_use]
    pub fn ack_matches(&self, sequence: Seq) -> bool {
        sequence == self.final_seq()
    }

    /// Registers a rejected aggregate ack or an ack timeout.
    pub fn on_failure(&mut self) -> RetryVerdict {
        if self.attempt >= MAX_ATTEMPTS {
            RetryVerdict::Abandon
        } else {
            self.attempt += 1;
            RetryVerdict::Retry {
                attempt: self.attempt,
            }
        }
    }
}

/// One chunk the SR engine wants written to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrTransmit {
    /// Zero-based position of the chunk within its message.
    pub index: usize,
    /// Wire sequence number.
    pub sequence: Seq,
    /// Whether this is the message's final chunk.
    pub is_last: bool,
    /// Whether this send is a retransmission.
    pub retransmit: bool,
}

/// What the IO driver should do next for an SR message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrAction {
    /// Write this chunk, then call [`SrSender::on_transmitted`].
    Transmit(SrTransmit),
    /// Nothing to send; poll for acks until this instant at the latest.
    Wait(Instant),
    /// The overall message deadline passed; call [`SrSender::on_deadline`].
    DeadlineExpired,
    /// Every chunk is acknowledged.
    Done,
}

/// How the SR engine classified an incoming ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrAckOutcome {
    /// The chunk is now confirmed.
    Confirmed {
        /// Sequence of the confirmed chunk.
        sequence: Seq,
    },
    /// The peer rejected the chunk; it is re-armed for immediate
    /// retransmission.
    Nacked {
        /// Sequence of the rejected chunk.
        sequence: Seq,
    },
    /// Duplicate or out-of-message ack; ignored.
    Stale,
}

#[derive(Debug)]
struct SrChunk {
    payload: String,
    acked: bool,
    /// `None` until first transmission, then the instant the resend timer
    /// fires. A nack sets it to "now" so the retransmission is immediate.
    resend_at: Option<Instant>,
}

/// Selective Repeat sender state for one message.
///
/// Maintains the invariant `B ≤ N ≤ B + W` implicitly: only chunks inside
/// `[B, B + min(cwnd, W))` are ever handed out for transmission, and `B`
/// advances past every contiguous acked run at the front. At most `W` chunks
/// are unacknowledged-and-sent at any moment.
#[derive(Debug)]
pub struct SrSender {
    base_seq: Seq,
    chunks: Vec<SrChunk>,
    base: usize,
    window: usize,
    cwnd: Cwnd,
    /// Cleared on nack or timer expiry; decides whether the next window
    /// advance grows `cwnd`.
    burst_clean: bool,
    deadline: Instant,
    attempt: u8,
}

impl SrSender {
    /// Creates the engine for one segmented message.
    ///
    /// # Panics
    ///
    /// Panics if `chunks` is empty or `window` is zero.
    #[must_use]
    pub fn new(base_seq: Seq, chunks: Vec<String>, window: usize, now: Instant) -> Self {
        assert!(!chunks.is_empty());
        assert!(window > 0);
        Self {
            base_seq,
            chunks: chunks
                .into_iter()
                .map(|payload| SrChunk {
                    payload,
                    acked: false,
                    resend_at: None,
                })
                .collect(),
            base: 0,
            window,
            cwnd: Cwnd::new(window),
            burst_clean: true,
            deadline: now + SR_MESSAGE_DEADLINE,
            attempt: 1,
        }
    }

    /// Number of chunks in this message.
    #[must_use]
    pub fn total_packets(&self) -> usize {
        self.chunks.len()
    }

    /// Cleartext of the chunk at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds for this message.
    #[must_use]
    pub fn payload(&self, index: usize) -> &str {
        &self.chunks[index].payload
    }

    /// Current 1-based attempt number.
    #[must_use]
    pub const fn attempt(&self) -> u8 {
        self.attempt
    }

    /// Current congestion window.
    #[must_use]
    pub const fn cwnd(&self) -> usize {
        self.cwnd.get()
    }

    /// Chunks sent but not yet acknowledged.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| !c.acked && c.resend_at.is_some())
            .count()
    }

    /// Whether every chunk is acknowledged.
    #[must_use]
    pub fn all_acked(&self) -> bool {
        self.base == self.chunks.len()
    }

    /// Decides the next step for the IO driver.
    pub fn next_action(&mut self, now: Instant) -> SrAction {
        if self.all_acked() {
            return SrAction::Done;
        }
        if now >= self.deadline {
            return SrAction::DeadlineExpired;
        }

        let hi = (self.base + self.cwnd.get().min(self.window)).min(self.chunks.len());
        let mut next_timer: Option<Instant> = None;
        for index in self.base..hi {
            let chunk = &self.chunks[index];
            if chunk.acked {
                continue;
            }
            match chunk.resend_at {
                None => {
                    return SrAction::Transmit(SrTransmit {
                        index,
                        sequence: self.base_seq + index as u64,
                        is_last: index == self.chunks.len() - 1,
                        retransmit: false,
                    });
                }
                Some(at) if at <= now => {
                    // a timer ran out: that is a failed burst
                    trace!(index, "chunk timer expired");
                    self.cwnd.on_failure();
                    self.burst_clean = false;
                    return SrAction::Transmit(SrTransmit {
                        index,
                        sequence: self.base_seq + index as u64,
                        is_last: index == self.chunks.len() - 1,
                        retransmit: true,
                    });
                }
                Some(at) => {
                    next_timer = Some(next_timer.map_or(at, |t| t.min(at)));
                }
            }
        }

        SrAction::Wait(next_timer.unwrap_or(self.deadline).min(self.deadline))
    }

    /// Records that the chunk at `index` was written (or deliberately lost
    /// by the fault hook) and starts its resend timer.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds for this message.
    pub fn on_transmitted(&mut self, index: usize, now: Instant) {
        self.chunks[index].resend_at = Some(now + SR_CHUNK_TIMEOUT);
    }

    /// Processes one incoming ack for this message.
    pub fn handle_ack(&mut self, sequence: Seq, status: AckStatus, now: Instant) -> SrAckOutcome {
        let offset = self.base_seq.dist_to(sequence);
        if sequence < self.base_seq || offset >= self.chunks.len() as u64 {
            return SrAckOutcome::Stale;
        }
        #[allow(clippy::cast_possible_truncation)]
        let index = offset as usize;
        let chunk = &mut self.chunks[index];

        match status {
            AckStatus::Ok => {
                if chunk.acked {
                    return SrAckOutcome::Stale;
                }
                chunk.acked = true;
                chunk.resend_at = None;
                let advanced = self.advance_base();
                if advanced {
                    if self.burst_clean {
                        self.cwnd.on_burst_ok();
                    } else {
                        self.burst_clean = true;
                    }
                }
                SrAckOutcome::Confirmed { sequence }
            }
            AckStatus::Error => {
                // fire the timer now; the next poll retransmits just this chunk
                chunk.resend_at = Some(now);
                self.cwnd.on_failure();
                self.burst_clean = false;
                SrAckOutcome::Nacked { sequence }
            }
        }
    }

    /// Registers the overall message deadline expiring. On retry, acked
    /// chunks stay acked — selective repeat retries selectively — and the
    /// timers of everything else are re-armed for a fresh send.
    pub fn on_deadline(&mut self, now: Instant) -> RetryVerdict {
        if self.attempt >= MAX_ATTEMPTS {
            return RetryVerdict::Abandon;
        }
        self.attempt += 1;
        self.cwnd.on_failure();
        self.burst_clean = false;
        for chunk in &mut self.chunks {
            if !chunk.acked {
                chunk.resend_at = None;
            }
        }
        self.deadline = now + SR_MESSAGE_DEADLINE;
        RetryVerdict::Retry {
            attempt: self.attempt,
        }
    }

    fn advance_base(&mut self) -> bool {
        let before = self.base;
        while self.base < self.chunks.len() && self.chunks[self.base].acked {
            self.base += 1;
        }
        self.base > before
    }
}
