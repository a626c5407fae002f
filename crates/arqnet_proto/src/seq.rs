//! See [`Seq`].

use std::{
    fmt,
    ops::{Add, AddAssign, Sub},
};

use serde::{Deserialize, Serialize};

/// Sequence number of a data packet within a session.
///
/// Sequence numbers are per-session monotonic across messages: chunk `i` of a
/// message is numbered `base + i`, and the base advances by the message's
/// total packet count whether or not the message was ultimately confirmed.
/// They are never reused and never reset between messages, so a plain `u64`
/// is enough — the engine runs over an ordered, reliable stream and will
/// never see enough packets for wraparound to matter.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Seq(pub u64);

impl Seq {
    /// Distance from `self` to `rhs`, i.e. how many sequence numbers lie in
    /// `[self, rhs)`.
    ///
    /// # Example
    ///
    /// ```
    /// # use arqnet_proto::seq::Seq;
    /// assert_eq!(Seq(3).dist_to(Seq(5)), 2);
    /// assert_eq!(Seq(5).dist_to(Seq(5)), 0);
    /// ```
    #[must_use]
    pub const fn dist_to(self, rhs: Self) -> u64 {
        rhs.0.saturating_sub(self.0)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for Seq {
    type Output = Seq;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for Seq {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub<Seq> for Seq {
    type Output = u64;

    fn sub(self, rhs: Seq) -> Self::Output {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering() {
        assert!(Seq(0) < Seq(1));
        assert!(Seq(41) < Seq(45));
        assert_eq!(Seq(7), Seq(3) + 4);
    }

    #[test]
    fn distance() {
        assert_eq!(Seq(10).dist_to(Seq(13)), 3);
        assert_eq!(Seq(13) - Seq(10), 3);
    }
}
