//! See [`RequestNum`] and [`PacketNum`].

use std::{cmp::Ordering, fmt};

/// Per-slot request number: monotonically increasing, wraps only at
/// implausible scales (`u64`). Lets the receiver detect duplicate
/// retransmissions and discard stale responses.
///
/// Comparison and arithmetic wrap the same way packet sequence numbers do
/// in other reliable-UDP designs, even though a `u64` is for all practical
/// purposes never going to wrap in this system's lifetime — the type is
/// kept wraparound-correct anyway so retransmission logic never has to
/// special-case it.
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    derive_more::Deref,
    derive_more::Add,
    derive_more::AddAssign,
    derive_more::Sub,
    derive_more::SubAssign,
)]
pub struct RequestNum(pub u64);

impl RequestNum {
    /// Creates a request number from a raw value.
    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// The next request number after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Debug for RequestNum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("RequestNum").field(&self.0).finish()
    }
}

/// Index of a packet within a large message's fragments, `0..total_pkts`.
///
/// Unlike [`RequestNum`], wraparound is not a practical concern here: a
/// single message is bounded to `u16::MAX` fragments (see
/// [`crate::frag::MessageTooBig`]), so plain numeric ordering is correct.
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Deref,
    derive_more::Add,
    derive_more::AddAssign,
)]
pub struct PacketNum(pub u16);

impl PacketNum {
    /// Creates a packet number from a raw value.
    #[must_use]
    pub const fn new(n: u16) -> Self {
        Self(n)
    }
}

impl fmt::Debug for PacketNum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("PacketNum").field(&self.0).finish()
    }
}

/// Session-scoped packet sequence number, used only to distinguish
/// retransmissions of the same packet slot in debug logging. Wraps the
/// same way [`crate::packet::Seq`]-style sequence numbers elsewhere in the
/// corpus do: the smallest signed distance around the `u16` circle decides
/// ordering.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SessionSeq(pub u16);

impl SessionSeq {
    /// Signed distance from `self` to `rhs`, taking wraparound into
    /// account. See `aeronet_transport::packet::Seq::dist_to` for the
    /// technique this is adapted from.
    #[must_use]
    pub const fn dist_to(self, rhs: Self) -> i16 {
        #[expect(clippy::cast_possible_wrap, reason = "we want wrap behavior")]
        (rhs.0.wrapping_sub(self.0) as i16)
    }
}

impl Ord for SessionSeq {
    fn cmp(&self, other: &Self) -> Ordering {
        #[expect(clippy::cast_possible_wrap, reason = "we want wrap behavior")]
        (self.0 as i16).wrapping_sub(other.0 as i16).cmp(&0)
    }
}

impl PartialOrd for SessionSeq {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_num_wraps_and_advances() {
        let n = RequestNum::new(u64::MAX);
        assert_eq!(n.next(), RequestNum::new(0));
    }

    #[test]
    fn session_seq_respects_wraparound() {
        assert!(SessionSeq(0) < SessionSeq(1));
        assert!(SessionSeq(u16::MAX) < SessionSeq(0));
        assert!(SessionSeq(u16::MAX) < SessionSeq(1));
    }
}
