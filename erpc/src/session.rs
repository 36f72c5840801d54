//! Per-peer session state machine: [`Session`] and the two roles a slot in
//! it can be occupied by ([`ClientSlot`], [`ServerSlot`]).

use std::time::Instant;

use erpc_alloc::MsgBuffer;
use erpc_nexus::EndpointId;
use erpc_transport::{CreditWindow, FragmentReceiver, PacketNum, RequestNum, RttEstimator, SeqBuf};

use crate::Error;

/// A session's lifecycle state (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session exists at this index; it is free for reuse.
    Disconnected,
    /// `create_session` has sent a `ConnectReq` and is awaiting
    /// `ConnectResp` or [`crate::Config::setup_timeout_us`].
    ConnectInProgress,
    /// Handshake complete; requests may be enqueued.
    Connected,
    /// `destroy_session` has sent a `DisconnectReq` and is awaiting
    /// `DisconnectResp` or timeout.
    DisconnectInProgress,
    /// A local reset is unwinding outstanding slots before the session
    /// number is returned to the free list.
    ResetInProgress,
}

/// Completion delivered to a client continuation once a request's lifetime
/// ends, successfully or not.
///
/// Always carries both buffers back to the caller, even on error — per
/// `spec.md` §5 "Session teardown cancels outstanding requests: ...
/// MsgBuffers are returned to the user unchanged" and the allocator
/// invariant that every `MsgBuffer` is freed exactly once.
pub struct Completion {
    /// The original request buffer passed to `enqueue_request`.
    pub req_buf: MsgBuffer,
    /// The response buffer passed to `enqueue_request`, filled in on
    /// success.
    pub resp_buf: MsgBuffer,
    /// Opaque tag the caller attached to this request.
    pub tag: u64,
    /// `Ok(())` once the response has landed in `resp_buf`; an error
    /// describing why the request will never complete otherwise.
    pub result: Result<(), Error>,
}

/// A user-supplied completion callback, invoked synchronously from inside
/// `run_event_loop` once a request's slot is released, per
/// `spec.md` §4.5/§9: "User continuations are invoked synchronously ... a
/// function handle + opaque tag is sufficient."
pub type Continuation = Box<dyn FnOnce(Completion)>;

/// Identifies one server-side in-flight request, handed to a
/// [`crate::Handler`] and to a later, possibly deferred,
/// `enqueue_response` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHandle {
    pub(crate) session_num: u16,
    pub(crate) slot_idx: usize,
    pub(crate) request_num: RequestNum,
}

impl RequestHandle {
    /// The session this request arrived on.
    #[must_use]
    pub const fn session_num(&self) -> u16 {
        self.session_num
    }
}

/// Client-side occupant of a session slot.
pub(crate) struct ClientSlot {
    pub(crate) request_num: RequestNum,
    pub(crate) req_type: u8,
    pub(crate) req_buf: MsgBuffer,
    pub(crate) resp_buf: MsgBuffer,
    pub(crate) tag: u64,
    pub(crate) cont: Continuation,
    /// `None` for a single-packet request, whose wire bytes are sent
    /// zero-copy straight out of `req_buf`'s headroom on every
    /// (re)transmission. `Some` for a segmented request, whose fragments
    /// were copied out once by `frag::split` and are reposted verbatim.
    pub(crate) fragments: Option<Vec<(PacketNum, Vec<u8>)>>,
    pub(crate) total_pkts: u16,
    /// Reassembles a large response. `None` until the response's first
    /// packet declares this a multi-packet transfer.
    pub(crate) frag_rx: Option<FragmentReceiver>,
    /// When this request's packet set was last (re)transmitted, for RTT
    /// sampling on completion.
    pub(crate) sent_at: Instant,
    /// Set once this slot has been retransmitted at least once — an RTT
    /// sample following a retransmission can't be attributed to a
    /// specific transmission (Karn's algorithm), so it is skipped.
    pub(crate) retransmitted: bool,
}

/// Server-side occupant of a session slot: one request being handled, or
/// already handled and awaiting the next retransmitted duplicate.
pub(crate) struct ServerSlot {
    pub(crate) request_num: RequestNum,
    pub(crate) req_type: u8,
    /// `Some` once the handler (or a deferred `enqueue_response` call) has
    /// produced a response, reposted verbatim on retransmission the same
    /// way `ClientSlot::fragments` is (`None` entry meaning "zero-copy from
    /// `resp_buf`" for the single-packet case).
    pub(crate) response: Option<ServerResponse>,
    /// Reassembles a large incoming request.
    pub(crate) frag_rx: Option<FragmentReceiver>,
}

pub(crate) struct ServerResponse {
    pub(crate) resp_buf: MsgBuffer,
    pub(crate) fragments: Option<Vec<(PacketNum, Vec<u8>)>>,
    pub(crate) total_pkts: u16,
}

pub(crate) enum SlotRole {
    Idle,
    Client(ClientSlot),
    Server(ServerSlot),
}

impl SlotRole {
    pub(crate) const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// A bidirectional channel between two endpoints (`spec.md` §3/§4.4).
pub(crate) struct Session {
    pub(crate) local_session_num: u16,
    pub(crate) remote_session_num: u16,
    pub(crate) remote_uri: String,
    pub(crate) remote_endpoint_id: EndpointId,
    pub(crate) state: SessionState,
    pub(crate) credit: CreditWindow,
    pub(crate) slots: Vec<SlotRole>,
    /// Per-slot monotonic request-number counter, one entry per residue
    /// class: slot `i`'s counter starts at `i` and advances by
    /// `session_slots` on every reuse, so `request_num % session_slots`
    /// always recovers the slot a packet belongs to without a dedicated wire
    /// field, regardless of the order in which slots are actually picked.
    /// `next_client_slot` is what guarantees the slot a counter value names
    /// is currently `Idle` before handing it out.
    pub(crate) slot_request_counters: Vec<u64>,
    /// Round-robin starting point for the next `Idle`-slot scan, so
    /// repeated calls don't all re-check the same low-numbered slots first.
    pub(crate) next_slot_cursor: usize,
    /// Populated only for slots with a pending retransmission deadline;
    /// adapted from `erpc_transport::seq_buf::SeqBuf`'s indices/data
    /// parallel-array trick, keyed directly by slot index.
    pub(crate) deadlines: SeqBuf<Instant>,
    pub(crate) rtt: RttEstimator,
    /// Deadline for the current `ConnectInProgress`/`DisconnectInProgress`
    /// handshake, past which it is treated as `SetupTimeout`.
    pub(crate) setup_deadline: Option<Instant>,
}

impl Session {
    pub(crate) fn new(local_session_num: u16, session_slots: usize) -> Self {
        let now = Instant::now();
        let slots = (0..session_slots).map(|_| SlotRole::Idle).collect();
        Self {
            local_session_num,
            remote_session_num: 0,
            remote_uri: String::new(),
            remote_endpoint_id: 0,
            state: SessionState::Disconnected,
            credit: CreditWindow::new(session_slots),
            slots,
            slot_request_counters: (0..session_slots as u64).collect(),
            next_slot_cursor: 0,
            deadlines: SeqBuf::new(session_slots, now),
            rtt: RttEstimator::default(),
            setup_deadline: None,
        }
    }

    pub(crate) fn session_slots(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot_index_for(&self, request_num: RequestNum) -> usize {
        (request_num.0 % self.slots.len() as u64) as usize
    }

    /// Finds an actually-`Idle` slot and returns it along with the next
    /// request number for its residue class. `credit.try_consume()`
    /// succeeding guarantees *some* slot is idle (the credit window bounds
    /// the count of outstanding requests to the slot count), but since
    /// responses can land out of order (`spec.md` §5), it does not
    /// guarantee which residue class that is — so this scans for the
    /// occupant instead of assuming round-robin order matches completion
    /// order.
    ///
    /// # Panics
    ///
    /// Panics if every slot is occupied; callers must only invoke this after
    /// `credit.try_consume()` has succeeded.
    pub(crate) fn next_client_slot(&mut self) -> (usize, RequestNum) {
        let num_slots = self.slots.len();
        for offset in 0..num_slots {
            let idx = (self.next_slot_cursor + offset) % num_slots;
            if self.slots[idx].is_idle() {
                self.next_slot_cursor = (idx + 1) % num_slots;
                let request_num = RequestNum::new(self.slot_request_counters[idx]);
                self.slot_request_counters[idx] += num_slots as u64;
                return (idx, request_num);
            }
        }
        unreachable!("credit window guarantees at least one slot is idle")
    }

    pub(crate) fn reset_for_reuse(&mut self) {
        let session_slots = self.slots.len();
        *self = Self::new(self.local_session_num, session_slots);
    }
}
