//! Thin abstraction over a kernel-bypass NIC.
//!
//! This crate defines the [`Transport`] trait: post sends, post receives,
//! poll completions, register memory. It deliberately knows nothing about
//! sessions, credit windows, or request/response semantics — that belongs to
//! `erpc_transport` and `erpc`, which are built on top of a `Transport`.
//!
//! Unreliable datagram semantics are assumed throughout: a [`Transport`] may
//! drop or reorder packets. Reliability is the caller's job.

pub mod loopback;
#[cfg(feature = "verbs")]
pub mod verbs;

pub use loopback::LoopbackTransport;

/// Opaque handle to a memory region registered with the NIC via
/// [`Transport::register_region`].
///
/// Holding an `Mr` does not keep the underlying memory alive; it is the
/// registrar's responsibility (the allocator, in practice) to deregister
/// before the memory is unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mr(pub u32);

/// A single packet to hand to [`Transport::post_send`].
///
/// `data` must point into a region previously passed to
/// [`Transport::register_region`]; the transport itself never copies or
/// validates this, it trusts the caller (the session layer) to only ever
/// post registered memory.
pub struct OutgoingPacket<'a> {
    /// Raw bytes to transmit, including any header the caller has already
    /// written into the buffer's headroom.
    pub data: &'a [u8],
    /// Opaque identifier echoed back in the matching
    /// [`CompletionEvent::Send`], so the caller can correlate completions to
    /// posted work without the transport understanding packet contents.
    pub wr_id: u64,
}

/// A single pre-registered buffer to hand to [`Transport::post_recv`], ready
/// to be filled in by the NIC.
pub struct RecvSlot<'a> {
    /// Writable memory the NIC may DMA into.
    pub buf: &'a mut [u8],
    /// Opaque identifier echoed back in the matching
    /// [`CompletionEvent::Recv`].
    pub wr_id: u64,
}

/// One entry returned by [`Transport::poll_completions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEvent {
    /// A previously posted send has left the wire (or been dropped by a
    /// local queue, in loopback mode). Does not mean the peer received it.
    Send {
        /// `wr_id` given to [`OutgoingPacket`].
        wr_id: u64,
    },
    /// A previously posted receive buffer was filled with `len` bytes.
    Recv {
        /// `wr_id` given to [`RecvSlot`].
        wr_id: u64,
        /// Number of bytes written into the buffer.
        len: usize,
    },
    /// The NIC reported an unrecoverable error on this queue pair. The
    /// endpoint must transition to a terminal state (see `erpc::Error::FatalTransport`).
    Error {
        /// Human-readable NIC-reported error string.
        reason: String,
    },
}

/// Errors produced by a [`Transport`] implementation.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
pub enum IoError {
    /// `register_region` was rejected by the NIC (pinning failed, the region
    /// overlaps an existing registration, or the device is out of MR slots).
    #[display("memory registration failed: {reason}")]
    RegistrationFailed {
        /// Driver-reported reason, if any.
        reason: String,
    },
    /// No verbs-capable device was found. Returned synchronously by
    /// [`verbs::VerbsTransport::open`] and never by [`LoopbackTransport`].
    #[display("no suitable kernel-bypass NIC present")]
    NoDevice,
    /// The NIC reported an error with no recovery path; the queue pair backing
    /// this transport is no longer usable.
    #[display("fatal transport error: {reason}")]
    Fatal {
        /// Driver-reported reason.
        reason: String,
    },
}

/// Thin abstraction over a kernel-bypass NIC's send queue, receive queue,
/// completion queue, and memory registration facility.
///
/// Implementations never block: [`Transport::poll_completions`] returns
/// immediately with whatever completions are ready, and
/// [`Transport::post_send`] fails silently (the packet is simply dropped) if
/// the send queue is full — the caller is expected to notice the missing
/// completion and retransmit via the session layer's retransmission timer,
/// exactly as an unreliable datagram fabric would behave.
pub trait Transport {
    /// Registers `len` bytes starting at `base` as DMA-able memory.
    ///
    /// # Safety
    ///
    /// `base` must point to `len` bytes of memory that outlives the returned
    /// [`Mr`] and that the caller will not move while registered.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::RegistrationFailed`] if the NIC rejects the region.
    unsafe fn register_region(&mut self, base: *mut u8, len: usize) -> Result<Mr, IoError>;

    /// Deregisters a region previously returned by [`Transport::register_region`].
    fn deregister_region(&mut self, mr: Mr);

    /// Enqueues `packets` for transmission.
    ///
    /// This call never blocks. If the send queue is full, packets are
    /// dropped silently (not erroring) — retransmission is the session
    /// layer's responsibility. Implementations may batch the underlying
    /// doorbell ring across calls; see [`Transport::tx_flush`].
    fn post_send(&mut self, packets: &[OutgoingPacket<'_>]);

    /// Replenishes the receive queue with pre-registered buffers.
    fn post_recv(&mut self, buffers: &mut [RecvSlot<'_>]);

    /// Polls for up to `max` completions, of either direction. Never blocks.
    fn poll_completions(&mut self, max: usize) -> Vec<CompletionEvent>;

    /// Issues the NIC doorbell if a previous [`Transport::post_send`] batch
    /// deferred signaling to amortize doorbell cost. A no-op for transports
    /// that ring the doorbell on every `post_send`.
    fn tx_flush(&mut self);
}
