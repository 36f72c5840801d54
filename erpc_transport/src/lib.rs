//! Wire format, segmentation, flow control, and RTT estimation for the
//! session transport layer.
//!
//! This crate is deliberately allocator-agnostic: it works entirely in
//! terms of `Vec<u8>`/`&[u8]` byte buffers, independent of how those bytes
//! were allocated. Copying reassembled bytes into a huge-page-backed
//! `MsgBuffer` is the caller's job (the `erpc` facade crate), keeping this
//! crate usable standalone (e.g. for fuzzing or unit testing the wire
//! format) without pulling in `erpc_alloc`.
//!
//! Reliability in this protocol is deadline-based retransmission of a
//! request's whole packet set, idempotent by [`packet::RequestNum`] — there
//! is no per-packet acknowledgement bitfield. A lost packet is recovered by
//! the sender simply retransmitting every packet of the slot once its
//! [`rtt::RttEstimator::pto`] deadline elapses; the receiver silently
//! discards or re-delivers duplicates using the bitfield tracked in
//! [`frag::FragmentReceiver`].

pub mod credit;
pub mod frag;
pub mod packet;
pub mod rtt;
pub mod seq_buf;

pub use {
    credit::{CreditWindow, NoCredits},
    frag::{FragmentReceiver, MessageTooBig, Reassembled, ReassembleError},
    packet::{HeaderError, PacketHeader, PacketNum, PacketType, RequestNum, SessionSeq},
    rtt::RttEstimator,
    seq_buf::SeqBuf,
};
