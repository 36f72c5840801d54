//! Defines the structure of packets on the wire.
//!
//! This module only contains type definitions and their wire codec, kept
//! separate from the logic that drives them (fragmentation in
//! [`crate::frag`], retransmission timing in [`crate::seq_buf`]), so the
//! whole wire protocol can be read at a glance.

mod header;
mod seq;

pub use {
    header::{HeaderError, PacketHeader},
    seq::{PacketNum, RequestNum, SessionSeq},
};

/// What kind of packet a [`PacketHeader`] describes.
///
/// `SmallRequest`/`SmallResponse` are single-packet messages that fit
/// under MTU minus header. The `Large*` variants segment a message across
/// multiple packets (see [`crate::frag`]); `*First` carries the total
/// message byte length as a 4-byte big-endian prefix to its payload, so the
/// receiver can size its reassembly buffer as soon as that packet arrives.
/// `ExplicitCredit` carries no payload and exists purely to return a
/// withheld credit once a reassembly buffer becomes available.
/// `RequestForResponse` is sent by a client whose large response has not
/// arrived, to re-pull it without waiting out a full retransmission cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Request payload fits in one packet.
    SmallRequest,
    /// Response payload fits in one packet.
    SmallResponse,
    /// First packet of a segmented request; payload is prefixed with the
    /// total request byte length.
    LargeRequestFirst,
    /// Non-first packet of a segmented request.
    LargeRequestContinuation,
    /// First packet of a segmented response; payload is prefixed with the
    /// total response byte length.
    LargeResponseFirst,
    /// Non-first packet of a segmented response.
    LargeResponseContinuation,
    /// Returns a previously withheld credit for a slot, with no payload.
    ExplicitCredit,
    /// Requests retransmission of a delayed large response.
    RequestForResponse,
}

impl PacketType {
    /// Encodes this variant as its wire tag byte.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::SmallRequest => 0,
            Self::SmallResponse => 1,
            Self::LargeRequestFirst => 2,
            Self::LargeRequestContinuation => 3,
            Self::LargeResponseFirst => 4,
            Self::LargeResponseContinuation => 5,
            Self::ExplicitCredit => 6,
            Self::RequestForResponse => 7,
        }
    }

    /// Decodes a wire tag byte, or `None` if it matches no variant.
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::SmallRequest),
            1 => Some(Self::SmallResponse),
            2 => Some(Self::LargeRequestFirst),
            3 => Some(Self::LargeRequestContinuation),
            4 => Some(Self::LargeResponseFirst),
            5 => Some(Self::LargeResponseContinuation),
            6 => Some(Self::ExplicitCredit),
            7 => Some(Self::RequestForResponse),
            _ => None,
        }
    }

    /// Whether this variant begins a segmented (large) message.
    #[must_use]
    pub const fn is_first_fragment(self) -> bool {
        matches!(self, Self::LargeRequestFirst | Self::LargeResponseFirst)
    }

    /// Whether this variant is a non-first fragment of a segmented
    /// message.
    #[must_use]
    pub const fn is_continuation(self) -> bool {
        matches!(
            self,
            Self::LargeRequestContinuation | Self::LargeResponseContinuation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips_for_every_variant() {
        let variants = [
            PacketType::SmallRequest,
            PacketType::SmallResponse,
            PacketType::LargeRequestFirst,
            PacketType::LargeRequestContinuation,
            PacketType::LargeResponseFirst,
            PacketType::LargeResponseContinuation,
            PacketType::ExplicitCredit,
            PacketType::RequestForResponse,
        ];
        for variant in variants {
            assert_eq!(PacketType::from_u8(variant.to_u8()), Some(variant));
        }
    }
}
