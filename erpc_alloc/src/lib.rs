//! Hugepage-backed, NIC-registered buffer allocator.
//!
//! A single [`HugeAllocator`] owns one contiguous `mmap`'d arena, bound to
//! the NUMA node of the NIC it feeds, and carved into power-of-two size
//! classes. Every [`MsgBuffer`] the transport ever sends or receives into
//! comes from one of these classes; there is no buddy coalescing, only
//! O(1) freelist push/pop.

pub mod allocator;
pub mod buffer;
pub mod error;

pub use {
    allocator::{HugeAllocator, HugeAllocatorConfig},
    buffer::{BufferOrigin, MsgBuffer},
    error::AllocError,
};

/// Bytes of header space reserved in front of every arena buffer's payload,
/// for the transport to write packet headers into without copying (see
/// `erpc_transport::packet::PacketHeader`).
pub const HEADROOM: usize = 64;

/// Smallest size class, one cache line.
pub const MIN_CLASS_BYTES: usize = 64;
