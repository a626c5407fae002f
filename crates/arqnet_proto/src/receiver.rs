//! The GBN and SR receiver engines.
//!
//! Like the senders these are pure state machines: each validated data
//! packet goes in, and what comes back out is at most one reply to write and
//! at most one fully reassembled message to hand to the application.
//!
//! The defining difference between the two variants lives here:
//!
//! - [`GbnReceiver`] emits *nothing* per packet. Failures latch a sticky
//!   corruption flag, and one aggregate ack — ok or error — goes out when
//!   the chunk marked `is_last` is processed.
//! - [`SrReceiver`] acknowledges every in-window or duplicate packet
//!   individually, nacks corrupt packets immediately, and silently drops
//!   anything beyond the window.

use ahash::AHashMap;
use tracing::trace;

use crate::{
    packet::{AckStatus, Packet},
    seq::Seq,
    validate::Verdict,
};

/// What a receiver engine wants done after processing one packet.
#[derive(Debug, Default)]
pub struct RecvOutput {
    /// Acknowledgement to write back, if any.
    pub reply: Option<Packet>,
    /// Fully reassembled message to deliver, if any.
    pub delivered: Option<String>,
}

impl RecvOutput {
    fn nothing() -> Self {
        Self::default()
    }
}

/// Go-Back-N receiver state for one session.
///
/// Accepted chunks always form a contiguous prefix `[msg_base, expected)`.
/// Anything else — a gap, an out-of-order chunk, a failed validation —
/// latches `corrupted` for the rest of the message, to be reported in the
/// aggregate ack.
#[derive(Debug)]
pub struct GbnReceiver {
    session_id: String,
    msg_base: Seq,
    expected: Seq,
    buf: Vec<String>,
    corrupted: bool,
    /// After a failed message: the sequence the *next* message starts at if
    /// the sender abandons instead of retrying (`msg_base + total_packets`).
    resync_to: Option<Seq>,
}

impl GbnReceiver {
    /// Creates the receiver for a freshly established session.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            msg_base: Seq(0),
            expected: Seq(0),
            buf: Vec::new(),
            corrupted: false,
            resync_to: None,
        }
    }

    /// A retransmission restarts at `msg_base`; a sender that spent its
    /// retry budget moves on, and its next message starts right after the
    /// abandoned one. Follow it there so the session is not stuck rejecting
    /// everything that comes later.
    fn maybe_resync(&mut self, sequence: Seq) {
        let Some(target) = self.resync_to else {
            return;
        };
        if sequence == target && self.expected == self.msg_base {
            self.msg_base = target;
            self.expected = target;
            self.resync_to = None;
        } else if sequence == self.msg_base {
            // the sender chose to retransmit instead
            self.resync_to = None;
        }
    }

    /// Processes one validated data packet.
    pub fn on_data(&mut self, verdict: &Verdict) -> RecvOutput {
        if let Verdict::Intact { sequence, .. } | Verdict::Corrupt { sequence, .. } = verdict {
            self.maybe_resync(*sequence);
        }
        let (sequence, total_packets, is_last) = match verdict {
            Verdict::Foreign => return RecvOutput::nothing(),
            Verdict::Intact {
                sequence,
                total_packets,
                is_last,
                cleartext,
            } => {
                if *sequence == self.expected {
                    self.buf.push(cleartext.clone());
                    self.expected += 1;
                } else if *sequence > self.expected {
                    // a gap: some chunk before this one went missing or bad
                    trace!(%sequence, expected = %self.expected, "gap, latching corruption");
                    self.corrupted = true;
                } else {
                    // a duplicate of an already-consumed chunk; ignored
                    // entirely, even when it carries the is_last flag of a
                    // message that was already closed out
                    return RecvOutput::nothing();
                }
                (*sequence, *total_packets, *is_last)
            }
            Verdict::Corrupt {
                sequence,
                total_packets,
                is_last,
                ..
            } => {
                self.corrupted = true;
                (*sequence, *total_packets, *is_last)
            }
        };

        if !is_last {
            return RecvOutput::nothing();
        }

        // message boundary: emit the one aggregate ack and reset
        let output = if self.corrupted {
            // the sender will retransmit the whole message under the same
            // sequence numbers, so expectation rewinds to the message base
            self.expected = self.msg_base;
            // unless it abandons; then the next message starts here
            if self.resync_to.is_none() {
                self.resync_to = Some(self.msg_base + total_packets as u64);
            }
            RecvOutput {
                reply: Some(Packet::Ack {
                    session_id: self.session_id.clone(),
                    sequence,
                    status: AckStatus::Error,
                    message: Some("message corrupted in transit".to_owned()),
                }),
                delivered: None,
            }
        } else {
            let message = self.buf.concat();
            self.msg_base = self.expected;
            self.resync_to = None;
            RecvOutput {
                reply: Some(Packet::Ack {
                    session_id: self.session_id.clone(),
                    sequence,
                    status: AckStatus::Ok,
                    message: Some(message.clone()),
                }),
                delivered: Some(message),
            }
        };
        self.buf.clear();
        self.corrupted = false;
        output
    }
}

/// Selective Repeat receiver state for one session.
///
/// Chunks are accepted anywhere in the window `[next_seq, next_seq + W)`;
/// the contiguous run at the front is consumed into the message prefix as it
/// forms (grounded on the same advance loop a reliable-ordered lane uses).
/// Completion is detected by count — `total_packets` arrives on every data
/// packet — because the chunk marked `is_last` may well not arrive last.
#[derive(Debug)]
pub struct SrReceiver {
    session_id: String,
    window: usize,
    msg_base: Seq,
    /// Base of the receive window; everything below is consumed.
    next_seq: Seq,
    /// Contiguous cleartext prefix of the current message.
    prefix: Vec<String>,
    /// In-window chunks received ahead of the contiguous prefix.
    pending: AHashMap<Seq, String>,
}

impl SrReceiver {
    /// Creates the receiver for a freshly established session.
    #[must_use]
    pub fn new(session_id: impl Into<String>, window: usize) -> Self {
        assert!(window > 0);
        Self {
            session_id: session_id.into(),
            window,
            msg_base: Seq(0),
            next_seq: Seq(0),
            prefix: Vec::new(),
            pending: AHashMap::new(),
        }
    }

    fn ack(&self, sequence: Seq, status: AckStatus, message: Option<String>) -> Packet {
        Packet::Ack {
            session_id: self.session_id.clone(),
            sequence,
            status,
            message,
        }
    }

    /// Processes one validated data packet.
    pub fn on_data(&mut self, verdict: &Verdict) -> RecvOutput {
        match verdict {
            Verdict::Foreign => RecvOutput::nothing(),
            Verdict::Corrupt { sequence, flaw, .. } => RecvOutput {
                reply: Some(self.ack(
                    *sequence,
                    AckStatus::Error,
                    Some(flaw.to_string()),
                )),
                delivered: None,
            },
            Verdict::Intact {
                sequence,
                total_packets,
                cleartext,
                ..
            } => self.on_intact(*sequence, *total_packets, cleartext),
        }
    }

    fn on_intact(&mut self, sequence: Seq, total_packets: usize, cleartext: &str) -> RecvOutput {
        if sequence < self.next_seq {
            // consumed already; the ack may have been lost on the peer's
            // side, so acknowledge again
            return RecvOutput {
                reply: Some(self.ack(sequence, AckStatus::Ok, None)),
                delivered: None,
            };
        }
        if self.next_seq.dist_to(sequence) >= self.window as u64 {
            // beyond the window: drop silently
            return RecvOutput::nothing();
        }

        if self.pending.contains_key(&sequence) {
            // buffered but not yet consumed: re-acknowledge, keep the first copy
            return RecvOutput {
                reply: Some(self.ack(sequence, AckStatus::Ok, None)),
                delivered: None,
            };
        }

        self.pending.insert(sequence, cleartext.to_owned());
        while let Some(chunk) = self.pending.remove(&self.next_seq) {
            self.prefix.push(chunk);
            self.next_seq += 1;
        }

        let reply = Some(self.ack(sequence, AckStatus::Ok, None));
        let delivered = if self.prefix.len() == total_packets {
            trace!(base = %self.msg_base, total_packets, "message complete");
            let message = self.prefix.concat();
            self.prefix.clear();
            self.pending.clear();
            self.msg_base = self.msg_base + total_packets as u64;
            debug_assert_eq!(self.next_seq, self.msg_base);
            Some(message)
        } else {
            None
        };
        RecvOutput { reply, delivered }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::validate::PacketFlaw;

    use super::*;

    fn intact(seq: u64, total: usize, is_last: bool, cleartext: &str) -> Verdict {
        Verdict::Intact {
            sequence: Seq(seq),
            total_packets: total,
            is_last,
            cleartext: cleartext.to_owned(),
        }
    }

    fn corrupt(seq: u64, total: usize, is_last: bool) -> Verdict {
        Verdict::Corrupt {
            sequence: Seq(seq),
            total_packets: total,
            is_last,
            flaw: PacketFlaw::DigestMismatch,
        }
    }

    #[test]
    fn gbn_emits_nothing_until_last_then_one_ok_ack() {
        let mut recv = GbnReceiver::new("ab12cd34");

        let out = recv.on_data(&intact(0, 3, false, "Hell"));
        assert!(out.reply.is_none() && out.delivered.is_none());
        let out = recv.on_data(&intact(1, 3, false, "o Wo"));
        assert!(out.reply.is_none());

        let out = recv.on_data(&intact(2, 3, true, "rld!"));
        assert_matches!(
            out.reply,
            Some(Packet::Ack {
                sequence: Seq(2),
                status: AckStatus::Ok,
                message: Some(echo),
                ..
            }) if echo == "Hello World!"
        );
        assert_eq!(out.delivered.as_deref(), Some("Hello World!"));
    }

    #[test]
    fn gbn_corruption_latches_to_final_error_ack() {
        let mut recv = GbnReceiver::new("ab12cd34");

        recv.on_data(&intact(0, 3, false, "Hell"));
        let out = recv.on_data(&corrupt(1, 3, false));
        assert!(out.reply.is_none()); // GBN never nacks per packet
        // chunk 2 is intact but arrives over a gap
        let out = recv.on_data(&intact(2, 3, true, "rld!"));
        assert_matches!(
            out.reply,
            Some(Packet::Ack {
                status: AckStatus::Error,
                ..
            })
        );
        assert!(out.delivered.is_none());

        // whole-message retransmission under the same sequence numbers
        recv.on_data(&intact(0, 3, false, "Hell"));
        recv.on_data(&intact(1, 3, false, "o Wo"));
        let out = recv.on_data(&intact(2, 3, true, "rld!"));
        assert_matches!(
            out.reply,
            Some(Packet::Ack {
                status: AckStatus::Ok,
                ..
            })
        );
        assert_eq!(out.delivered.as_deref(), Some("Hello World!"));
    }

    #[test]
    fn gbn_out_of_order_intact_chunk_latches() {
        let mut recv = GbnReceiver::new("ab12cd34");
        // chunk 0 never arrives
        recv.on_data(&intact(1, 2, false, "cd"));
        let out = recv.on_data(&intact(1, 2, true, "cd"));
        assert_matches!(
            out.reply,
            Some(Packet::Ack {
                status: AckStatus::Error,
                ..
            })
        );
    }

    #[test]
    fn gbn_duplicate_is_ignored() {
        let mut recv = GbnReceiver::new("ab12cd34");
        recv.on_data(&intact(0, 2, false, "ab"));
        recv.on_data(&intact(0, 2, false, "ab"));
        let out = recv.on_data(&intact(1, 2, true, "cd"));
        // the duplicate neither latched nor duplicated the prefix
        assert_eq!(out.delivered.as_deref(), Some("abcd"));
    }

    #[test]
    fn gbn_duplicate_of_final_chunk_is_ignored() {
        let mut recv = GbnReceiver::new("ab12cd34");
        recv.on_data(&intact(0, 2, false, "ab"));
        let out = recv.on_data(&intact(1, 2, true, "cd"));
        assert_eq!(out.delivered.as_deref(), Some("abcd"));

        // a stray redelivery of the closed-out message's final chunk must
        // not re-open the message boundary: no second ack, no delivery
        let out = recv.on_data(&intact(1, 2, true, "cd"));
        assert!(out.reply.is_none());
        assert!(out.delivered.is_none());

        // and the next message still flows normally
        let out = recv.on_data(&intact(2, 1, true, "ef"));
        assert_eq!(out.delivered.as_deref(), Some("ef"));
    }

    #[test]
    fn gbn_sequences_continue_across_messages() {
        let mut recv = GbnReceiver::new("ab12cd34");
        recv.on_data(&intact(0, 1, true, "one"));
        let out = recv.on_data(&intact(1, 1, true, "two"));
        assert_eq!(out.delivered.as_deref(), Some("two"));
    }

    #[test]
    fn gbn_recovers_after_the_sender_abandons_a_message() {
        let mut recv = GbnReceiver::new("ab12cd34");

        // a 2-chunk message fails three times (chunk 0 never intact)
        for _ in 0..3 {
            recv.on_data(&corrupt(0, 2, false));
            let out = recv.on_data(&intact(1, 2, true, "cd"));
            assert_matches!(
                out.reply,
                Some(Packet::Ack {
                    status: AckStatus::Error,
                    ..
                })
            );
        }

        // the sender gives up and moves on; the next message starts at
        // sequence 2 and must still be deliverable
        recv.on_data(&intact(2, 2, false, "ef"));
        let out = recv.on_data(&intact(3, 2, true, "gh"));
        assert_eq!(out.delivered.as_deref(), Some("efgh"));
    }

    #[test]
    fn sr_acks_each_chunk_and_delivers_in_order() {
        let mut recv = SrReceiver::new("ab12cd34", 3);

        let out = recv.on_data(&intact(0, 3, false, "abcd"));
        assert_matches!(
            out.reply,
            Some(Packet::Ack {
                sequence: Seq(0),
                status: AckStatus::Ok,
                ..
            })
        );
        recv.on_data(&intact(1, 3, false, "efgh"));
        let out = recv.on_data(&intact(2, 3, true, "ij"));
        assert_eq!(out.delivered.as_deref(), Some("abcdefghij"));
    }

    #[test]
    fn sr_reassembles_out_of_order_arrivals() {
        let mut recv = SrReceiver::new("ab12cd34", 3);

        let out = recv.on_data(&intact(2, 3, true, "ij"));
        assert_matches!(out.reply, Some(Packet::Ack { sequence: Seq(2), .. }));
        assert!(out.delivered.is_none());

        recv.on_data(&intact(0, 3, false, "abcd"));
        let out = recv.on_data(&intact(1, 3, false, "efgh"));
        // completion is by count, not by which chunk arrived last
        assert_eq!(out.delivered.as_deref(), Some("abcdefghij"));
    }

    #[test]
    fn sr_duplicate_is_acked_again() {
        let mut recv = SrReceiver::new("ab12cd34", 3);

        recv.on_data(&intact(0, 2, false, "ab"));
        let out = recv.on_data(&intact(0, 2, false, "ab"));
        assert_matches!(
            out.reply,
            Some(Packet::Ack {
                sequence: Seq(0),
                status: AckStatus::Ok,
                ..
            })
        );

        let out = recv.on_data(&intact(1, 2, true, "cd"));
        assert_eq!(out.delivered.as_deref(), Some("abcd"));
    }

    #[test]
    fn sr_beyond_window_is_dropped_silently() {
        let mut recv = SrReceiver::new("ab12cd34", 3);
        let out = recv.on_data(&intact(3, 5, false, "x"));
        assert!(out.reply.is_none());
        assert!(out.delivered.is_none());
    }

    #[test]
    fn sr_corrupt_chunk_is_nacked_then_recovered() {
        let mut recv = SrReceiver::new("ab12cd34", 3);

        recv.on_data(&intact(0, 3, false, "abcd"));
        let out = recv.on_data(&corrupt(1, 3, false));
        assert_matches!(
            out.reply,
            Some(Packet::Ack {
                sequence: Seq(1),
                status: AckStatus::Error,
                ..
            })
        );

        recv.on_data(&intact(2, 3, true, "ij"));
        let out = recv.on_data(&intact(1, 3, false, "efgh"));
        assert_eq!(out.delivered.as_deref(), Some("abcdefghij"));
    }

    #[test]
    fn sr_sequences_continue_across_messages() {
        let mut recv = SrReceiver::new("ab12cd34", 3);
        recv.on_data(&intact(0, 2, false, "ab"));
        let out = recv.on_data(&intact(1, 2, true, "cd"));
        assert_eq!(out.delivered.as_deref(), Some("abcd"));

        recv.on_data(&intact(2, 2, false, "ef"));
        let out = recv.on_data(&intact(3, 2, true, "gh"));
        assert_eq!(out.delivered.as_deref(), Some("efgh"));
    }
}
