//! See [`PacketHeader`].

use crate::packet::PacketType;

/// Fixed-size header in front of every packet's payload.
///
/// Wire layout (big-endian), per `spec.md` §6:
///
/// ```text
/// session_num   u16
/// request_num   u64
/// packet_type   u8
/// flags         u8
/// total_pkts    u16
/// this_pkt      u16
/// payload_len   u16
/// req_type      u8
/// -- padded with zero bytes to WIRE_LEN --
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketHeader {
    /// Session number this packet belongs to, scoped to the receiving
    /// endpoint.
    pub session_num: u16,
    /// Request number of the slot this packet belongs to.
    pub request_num: u64,
    /// What kind of packet this is.
    pub packet_type: PacketType,
    /// Reserved for forward compatibility; always `0` today.
    pub flags: u8,
    /// Total number of packets in this request/response, including this
    /// one.
    pub total_pkts: u16,
    /// Index of this packet within the request/response, `0..total_pkts`.
    pub this_pkt: u16,
    /// Length of the payload following this header.
    pub payload_len: u16,
    /// Application-level request type, used by the receiver to pick a
    /// handler. Only meaningful on request packets (`SmallRequest`/
    /// `LargeRequestFirst`); carried on every packet of a segmented
    /// request for simplicity, ignored on continuations and on every
    /// response packet.
    pub req_type: u8,
}

/// Errors decoding a [`PacketHeader`] from untrusted wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum HeaderError {
    /// Fewer than [`PacketHeader::WIRE_LEN`] bytes were available.
    #[display("packet too short to contain a header: {len} bytes")]
    Truncated {
        /// Bytes actually available.
        len: usize,
    },
    /// The `packet_type` byte did not match any known [`PacketType`].
    #[display("unknown packet type tag {tag}")]
    InvalidPacketType {
        /// The unrecognized tag byte.
        tag: u8,
    },
}

impl PacketHeader {
    /// On-wire size of a header, padded to one cache line so the payload
    /// that follows starts at an aligned offset (matching
    /// `erpc_alloc::HEADROOM`).
    pub const WIRE_LEN: usize = 64;

    /// Encodes `self` into the first [`PacketHeader::WIRE_LEN`] bytes of
    /// `dst`, zero-padding the remainder.
    ///
    /// # Panics
    ///
    /// Panics if `dst` is shorter than [`PacketHeader::WIRE_LEN`].
    pub fn encode(&self, dst: &mut [u8]) {
        assert!(dst.len() >= Self::WIRE_LEN, "dst too short for header");
        dst[0..2].copy_from_slice(&self.session_num.to_be_bytes());
        dst[2..10].copy_from_slice(&self.request_num.to_be_bytes());
        dst[10] = self.packet_type.to_u8();
        dst[11] = self.flags;
        dst[12..14].copy_from_slice(&self.total_pkts.to_be_bytes());
        dst[14..16].copy_from_slice(&self.this_pkt.to_be_bytes());
        dst[16..18].copy_from_slice(&self.payload_len.to_be_bytes());
        dst[18] = self.req_type;
        dst[19..Self::WIRE_LEN].fill(0);
    }

    /// Decodes a header from the first [`PacketHeader::WIRE_LEN`] bytes of
    /// `src`.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::Truncated`] if `src` is shorter than
    /// [`PacketHeader::WIRE_LEN`], or [`HeaderError::InvalidPacketType`] if
    /// the packet-type byte is unrecognized.
    pub fn decode(src: &[u8]) -> Result<Self, HeaderError> {
        if src.len() < Self::WIRE_LEN {
            return Err(HeaderError::Truncated { len: src.len() });
        }
        let session_num = u16::from_be_bytes([src[0], src[1]]);
        let request_num = u64::from_be_bytes(src[2..10].try_into().expect("8-byte slice"));
        let packet_type =
            PacketType::from_u8(src[10]).ok_or(HeaderError::InvalidPacketType { tag: src[10] })?;
        let flags = src[11];
        let total_pkts = u16::from_be_bytes([src[12], src[13]]);
        let this_pkt = u16::from_be_bytes([src[14], src[15]]);
        let payload_len = u16::from_be_bytes([src[16], src[17]]);
        let req_type = src[18];
        Ok(Self {
            session_num,
            request_num,
            packet_type,
            flags,
            total_pkts,
            this_pkt,
            payload_len,
            req_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PacketHeader {
        PacketHeader {
            session_num: 7,
            request_num: 0xDEAD_BEEF_0011_2233,
            packet_type: PacketType::SmallRequest,
            flags: 0,
            total_pkts: 1,
            this_pkt: 0,
            payload_len: 42,
            req_type: 5,
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let header = sample();
        let mut buf = [0u8; PacketHeader::WIRE_LEN];
        header.encode(&mut buf);
        let decoded = PacketHeader::decode(&buf).expect("decode");
        assert_eq!(header, decoded);
    }

    #[test]
    fn padding_bytes_are_zeroed() {
        let header = sample();
        let mut buf = [0xFFu8; PacketHeader::WIRE_LEN];
        header.encode(&mut buf);
        assert!(buf[19..].iter().all(|&b| b == 0));
    }

    #[test]
    fn truncated_header_is_rejected() {
        let buf = [0u8; PacketHeader::WIRE_LEN - 1];
        let err = PacketHeader::decode(&buf).unwrap_err();
        assert!(matches!(err, HeaderError::Truncated { len } if len == buf.len()));
    }

    #[test]
    fn invalid_packet_type_is_rejected() {
        let mut buf = [0u8; PacketHeader::WIRE_LEN];
        sample().encode(&mut buf);
        buf[10] = 0xFF;
        let err = PacketHeader::decode(&buf).unwrap_err();
        assert!(matches!(err, HeaderError::InvalidPacketType { tag: 0xFF }));
    }
}
