//! Splitting large messages into packet-sized fragments, and reassembling
//! fragments back into a complete message.
//!
//! Packets are forward-numbered `0..total_pkts` (`spec.md` §4.4), unlike
//! `aeronet_transport::frag`'s reverse-numbered scheme: the first packet
//! ([`PacketType::LargeRequestFirst`]/[`PacketType::LargeResponseFirst`])
//! carries the total message byte length as a 4-byte big-endian prefix to
//! its payload, so the receiver can size its reassembly buffer as soon as
//! that packet arrives, rather than waiting for the highest-numbered one.

use std::collections::HashMap;

use bit_vec::BitVec;

use crate::packet::{PacketNum, RequestNum};

/// Prefix length of packet 0's payload: the `u32` big-endian total message
/// byte length.
pub const TOTAL_LEN_PREFIX: usize = 4;

/// A message was too large to split into a representable number of
/// fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("message too big: {byte_len} bytes would need {num_frags} fragments, max {}", u16::MAX)]
pub struct MessageTooBig {
    /// Length of the message that was too big.
    pub byte_len: usize,
    /// Number of fragments it would have needed.
    pub num_frags: usize,
}

/// Splits `msg` into `max_frag_len`-sized chunks, forward-numbered from
/// `0`. The first chunk is prefixed with `msg.len()` as the first
/// [`TOTAL_LEN_PREFIX`] bytes it carries (the caller is responsible for
/// writing packet 0 with [`PacketType::LargeRequestFirst`]/
/// [`PacketType::LargeResponseFirst`] and the rest as continuations).
///
/// # Errors
///
/// Returns [`MessageTooBig`] if `msg` would need more than `u16::MAX`
/// fragments.
///
/// # Panics
///
/// Panics if `max_frag_len <= TOTAL_LEN_PREFIX` (there would be no room
/// left for payload bytes in the first fragment).
pub fn split(max_frag_len: usize, msg: &[u8]) -> Result<Vec<(PacketNum, Vec<u8>)>, MessageTooBig> {
    assert!(
        max_frag_len > TOTAL_LEN_PREFIX,
        "max_frag_len must leave room for the total-length prefix"
    );

    if msg.is_empty() {
        let mut first = Vec::with_capacity(TOTAL_LEN_PREFIX);
        first.extend_from_slice(&0u32.to_be_bytes());
        return Ok(vec![(PacketNum::new(0), first)]);
    }

    let first_chunk_cap = max_frag_len - TOTAL_LEN_PREFIX;
    let remaining_after_first = msg.len().saturating_sub(first_chunk_cap);
    let continuation_frags = remaining_after_first.div_ceil(max_frag_len.max(1));
    let num_frags = 1 + continuation_frags;
    if num_frags > usize::from(u16::MAX) {
        return Err(MessageTooBig {
            byte_len: msg.len(),
            num_frags,
        });
    }

    let mut out = Vec::with_capacity(num_frags);

    let (first_payload, rest) = msg.split_at(first_chunk_cap.min(msg.len()));
    let mut first = Vec::with_capacity(TOTAL_LEN_PREFIX + first_payload.len());
    #[expect(clippy::cast_possible_truncation, reason = "checked against u16::MAX above")]
    first.extend_from_slice(&(msg.len() as u32).to_be_bytes());
    first.extend_from_slice(first_payload);
    out.push((PacketNum::new(0), first));

    for (i, chunk) in rest.chunks(max_frag_len).enumerate() {
        #[expect(clippy::cast_possible_truncation, reason = "checked against u16::MAX above")]
        let packet_num = PacketNum::new((i + 1) as u16);
        out.push((packet_num, chunk.to_vec()));
    }

    Ok(out)
}

/// Reassembly state for one in-flight large message.
struct MessageBuf {
    total_len: Option<usize>,
    buf: Vec<u8>,
    received: BitVec,
    received_count: usize,
    total_pkts: usize,
}

impl MessageBuf {
    fn new(total_pkts: usize) -> Self {
        Self {
            total_len: None,
            buf: Vec::new(),
            received: BitVec::from_elem(total_pkts, false),
            received_count: 0,
            total_pkts,
        }
    }
}

/// Invalid or duplicate fragment observed during reassembly.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum ReassembleError {
    /// Already received a fragment with this index (a harmless duplicate
    /// from retransmission, not necessarily an attack — the caller should
    /// drop it rather than treat it as fatal).
    #[display("already received fragment {index}")]
    AlreadyReceived {
        /// Index of the duplicate fragment.
        index: u16,
    },
    /// Packet 0 carried a payload shorter than [`TOTAL_LEN_PREFIX`] bytes.
    #[display("first fragment too short to contain a length prefix: {len} bytes")]
    FirstFragmentTooShort {
        /// Bytes actually present.
        len: usize,
    },
    /// A non-first fragment arrived with an index beyond `total_pkts`.
    #[display("fragment index {index} is out of range for {total_pkts} total packets")]
    IndexOutOfRange {
        /// The out-of-range index.
        index: u16,
        /// Declared total packet count for this message.
        total_pkts: u16,
    },
}

/// Receives fragments produced by [`split`] and reassembles them into
/// complete messages, keyed by the sender's [`RequestNum`].
#[derive(Default)]
pub struct FragmentReceiver {
    msgs: HashMap<RequestNum, MessageBuf>,
}

/// Outcome of feeding one fragment into a [`FragmentReceiver`].
pub enum Reassembled {
    /// The message is not yet complete; more fragments are needed.
    Incomplete,
    /// Every fragment has arrived; the message is ready.
    Complete(Vec<u8>),
}

impl FragmentReceiver {
    /// Creates an empty receiver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages currently being reassembled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.msgs.len()
    }

    /// Feeds one fragment into the receiver.
    ///
    /// `total_pkts` and `this_pkt` come from the packet's
    /// [`crate::packet::PacketHeader`]; `payload` is the packet's payload
    /// bytes (for `this_pkt == 0`, including the length prefix). `max_frag_len`
    /// must be the same fixed fragment size passed to the [`split`] call that
    /// produced this message: fragment 0 occupies the first
    /// `max_frag_len - TOTAL_LEN_PREFIX` bytes of the reassembled message and
    /// every continuation occupies a fixed `max_frag_len`-byte stride after
    /// that, regardless of how short the final fragment's own payload is.
    ///
    /// # Errors
    ///
    /// See [`ReassembleError`].
    pub fn reassemble(
        &mut self,
        request_num: RequestNum,
        total_pkts: u16,
        this_pkt: u16,
        payload: &[u8],
        max_frag_len: usize,
    ) -> Result<Reassembled, ReassembleError> {
        let msg = self
            .msgs
            .entry(request_num)
            .or_insert_with(|| MessageBuf::new(usize::from(total_pkts)));

        let index = usize::from(this_pkt);
        if index >= msg.total_pkts {
            return Err(ReassembleError::IndexOutOfRange {
                index: this_pkt,
                total_pkts,
            });
        }
        if msg.received[index] {
            return Err(ReassembleError::AlreadyReceived { index: this_pkt });
        }

        if this_pkt == 0 {
            if payload.len() < TOTAL_LEN_PREFIX {
                return Err(ReassembleError::FirstFragmentTooShort { len: payload.len() });
            }
            let total_len = u32::from_be_bytes(
                payload[..TOTAL_LEN_PREFIX]
                    .try_into()
                    .expect("checked length above"),
            ) as usize;
            msg.total_len = Some(total_len);
            msg.buf.resize(total_len, 0);
            let data = &payload[TOTAL_LEN_PREFIX..];
            let end = data.len().min(total_len);
            msg.buf[..end].copy_from_slice(&data[..end]);
        } else {
            // Continuation fragments land at a fixed stride: packet 0 holds
            // `max_frag_len - TOTAL_LEN_PREFIX` bytes of message data, and
            // every fragment after it holds a full `max_frag_len` bytes
            // (the last one may be shorter, but that doesn't shift its own
            // offset, only the length of what gets copied).
            let first_chunk_cap = max_frag_len - TOTAL_LEN_PREFIX;
            let offset = first_chunk_cap + (index - 1) * max_frag_len;
            let offset = if msg.total_len.is_some() {
                offset.min(msg.buf.len())
            } else {
                // packet 0 hasn't arrived yet: grow the buffer speculatively.
                msg.buf.resize(msg.buf.len().max(offset + payload.len()), 0);
                offset
            };
            let end = (offset + payload.len()).min(msg.buf.len());
            if end > offset {
                msg.buf[offset..end].copy_from_slice(&payload[..end - offset]);
            }
        }

        msg.received.set(index, true);
        msg.received_count += 1;

        if msg.received_count == msg.total_pkts && msg.total_len.is_some() {
            let msg = self.msgs.remove(&request_num).expect("just matched");
            Ok(Reassembled::Complete(msg.buf))
        } else {
            Ok(Reassembled::Incomplete)
        }
    }

    /// Drops any in-flight reassembly state for `request_num`, e.g. on
    /// session reset.
    pub fn forget(&mut self, request_num: RequestNum) {
        self.msgs.remove(&request_num);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_message_round_trips_through_one_fragment() {
        let msg = b"hello world";
        let frags = split(64, msg).expect("split");
        assert_eq!(frags.len(), 1);

        let mut recv = FragmentReceiver::new();
        let (num, payload) = &frags[0];
        let outcome = recv
            .reassemble(RequestNum::new(1), 1, num.0, payload, 64)
            .expect("reassemble");
        match outcome {
            Reassembled::Complete(bytes) => assert_eq!(bytes, msg),
            Reassembled::Incomplete => panic!("expected completion after one fragment"),
        }
    }

    #[test]
    fn large_message_reassembles_in_order() {
        let msg: Vec<u8> = (0u8..=200).collect();
        let max_frag_len = 32;
        let frags = split(max_frag_len, &msg).expect("split");
        assert!(frags.len() > 1);

        let mut recv = FragmentReceiver::new();
        let total_pkts = frags.len() as u16;
        let mut result = None;
        for (num, payload) in &frags {
            let outcome = recv
                .reassemble(RequestNum::new(2), total_pkts, num.0, payload, max_frag_len)
                .expect("reassemble");
            if let Reassembled::Complete(bytes) = outcome {
                result = Some(bytes);
            }
        }
        assert_eq!(result.expect("should complete"), msg);
    }

    #[test]
    fn large_message_reassembles_out_of_order() {
        let msg: Vec<u8> = (0u8..=200).collect();
        let max_frag_len = 32;
        let frags = split(max_frag_len, &msg).expect("split");
        let total_pkts = frags.len() as u16;

        let mut shuffled = frags;
        shuffled.reverse();

        let mut recv = FragmentReceiver::new();
        let mut result = None;
        for (num, payload) in &shuffled {
            let outcome = recv
                .reassemble(RequestNum::new(3), total_pkts, num.0, payload, max_frag_len)
                .expect("reassemble");
            if let Reassembled::Complete(bytes) = outcome {
                result = Some(bytes);
            }
        }
        assert_eq!(result.expect("should complete"), msg);
    }

    #[test]
    fn duplicate_fragment_is_rejected() {
        let frags = split(64, b"hello world").expect("split");
        let mut recv = FragmentReceiver::new();
        let (num, payload) = &frags[0];
        recv.reassemble(RequestNum::new(4), 1, num.0, payload, 64)
            .expect("first delivery");
        // The message already completed and was removed, so redelivering
        // packet 0 starts a *new* in-flight entry rather than erroring;
        // duplicate detection only fires within the same in-flight message.
        let frags = split(16, &(0u8..=100).collect::<Vec<_>>()).expect("split");
        let mut recv = FragmentReceiver::new();
        let (num, payload) = &frags[0];
        recv.reassemble(RequestNum::new(5), frags.len() as u16, num.0, payload, 16)
            .expect("first delivery");
        let err = recv
            .reassemble(RequestNum::new(5), frags.len() as u16, num.0, payload, 16)
            .unwrap_err();
        assert!(matches!(err, ReassembleError::AlreadyReceived { index: 0 }));
    }

    #[test]
    fn empty_message_completes_immediately() {
        let frags = split(64, b"").expect("split");
        assert_eq!(frags.len(), 1);
        let mut recv = FragmentReceiver::new();
        let (num, payload) = &frags[0];
        let outcome = recv
            .reassemble(RequestNum::new(6), 1, num.0, payload, 64)
            .expect("reassemble");
        match outcome {
            Reassembled::Complete(bytes) => assert!(bytes.is_empty()),
            Reassembled::Incomplete => panic!("expected completion"),
        }
    }
}
