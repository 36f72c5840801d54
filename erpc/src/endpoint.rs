//! See [`RpcEndpoint`].

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use erpc_alloc::{HugeAllocator, HugeAllocatorConfig, MsgBuffer};
use erpc_io::{CompletionEvent, OutgoingPacket, RecvSlot, Transport};
use erpc_nexus::{EndpointId, Inbox, ManagementPacket, Nexus, PacketKind};
use erpc_transport::{frag, FragmentReceiver, PacketHeader, PacketType, Reassembled, RequestNum};
use ringbuf::traits::Consumer;
use tracing::{error, trace, warn};

use crate::{
    config::Config,
    error::Error,
    session::{
        ClientSlot, Completion, Continuation, RequestHandle, ServerResponse, ServerSlot, Session,
        SessionState, SlotRole,
    },
    stats::EndpointStats,
};

/// Upper bound on concurrently live sessions per endpoint.
///
/// `spec.md` §4.3 describes "a vector of sessions indexed by session
/// number" with session numbers as "typed indices into fixed-size owning
/// vectors" (§9 Appendix) but does not bound its size via [`Config`]; a
/// fixed constant keeps session numbers dense `u16` indices into a
/// preallocated `Vec`, the same fixed-pool style `erpc_alloc::HugeAllocator`
/// uses for its size classes, rather than a growable vector whose reallocs
/// would invalidate borrowed slot indices mid-event-loop.
const MAX_SESSIONS: usize = 256;

/// Notifications delivered to a [`SmHandler`] as sessions move through
/// their lifecycle (`spec.md` §4.4/§4.5), asynchronous to the
/// `create_session`/`destroy_session` calls that triggered them.
#[derive(Debug)]
pub enum SmEvent {
    /// A `create_session` handshake completed successfully.
    Connected {
        /// The now-`Connected` session.
        session_num: u16,
    },
    /// A `create_session` handshake failed.
    ConnectFailed {
        /// The session number that has been released back to the free
        /// list.
        session_num: u16,
        /// Why the handshake failed.
        error: Error,
    },
    /// A session reached `Disconnected`, either via a graceful
    /// `destroy_session` round trip or a local reset.
    Disconnected {
        /// The now-free session number.
        session_num: u16,
    },
}

/// User callback for session lifecycle events, invoked synchronously from
/// inside `run_event_loop`.
pub type SmHandler = Box<dyn FnMut(SmEvent)>;

/// User callback for an inbound request, invoked synchronously from inside
/// `run_event_loop` once a request (or the last fragment of a segmented
/// one) has fully arrived.
///
/// The handler takes ownership of `req_buf` and must eventually call
/// [`RpcEndpoint::free_msg_buffer`] on it (directly, or indirectly by
/// reusing it as the buffer passed to [`RpcEndpoint::enqueue_response`] is
/// a *different*, caller-allocated buffer — the request buffer itself is
/// never reused as the response buffer). The response need not be enqueued
/// before the handler returns: `handle` remains valid for a later,
/// deferred `enqueue_response` call from anywhere in the handler's thread
/// of control, including a later `run_event_loop` pass.
pub type Handler = Box<dyn FnMut(&mut RpcEndpoint, RequestHandle, MsgBuffer)>;

/// [`RpcEndpoint::enqueue_request`] failed before a send was ever posted;
/// both buffers are handed back unchanged.
#[derive(Debug)]
pub struct EnqueueRequestError {
    /// Why the request was rejected.
    pub error: Error,
    /// The request buffer, returned unchanged.
    pub req_buf: MsgBuffer,
    /// The response buffer, returned unchanged.
    pub resp_buf: MsgBuffer,
}

/// [`RpcEndpoint::enqueue_response`] failed; the response buffer is handed
/// back unchanged.
#[derive(Debug)]
pub struct EnqueueResponseError {
    /// Why the response was rejected.
    pub error: Error,
    /// The response buffer, returned unchanged.
    pub resp_buf: MsgBuffer,
}

/// A send that has been validated and applied to in-memory slot state but
/// not yet posted to the transport; drained by `run_event_loop`'s "process
/// enqueued outbound FIFO" step (`spec.md` §4.5 step 3).
enum PendingSend {
    Request { session_num: u16, slot_idx: usize },
    Response { session_num: u16, slot_idx: usize },
    /// A small header-only packet re-pulling a large response that stalled
    /// partway through reassembly, in place of resending the whole (possibly
    /// much larger) request (`spec.md` §3/§4.4, `PacketType::RequestForResponse`).
    RequestForResponse { session_num: u16, slot_idx: usize },
}

/// Per-thread RPC endpoint: one transport, one arena, a vector of sessions
/// indexed by session number, a handler table keyed by request type, and
/// the background bookkeeping `spec.md` §4.3 assigns it.
///
/// An `RpcEndpoint` is used by exactly one thread after creation; every
/// method that touches session or slot state is `&mut self`, enforcing
/// that invariant at the type level rather than with a runtime check.
pub struct RpcEndpoint {
    id: EndpointId,
    uri: String,
    config: Config,
    nexus: Nexus,
    inbox: Inbox,
    transport: Box<dyn Transport>,
    /// `None` only during `Drop`, after `HugeAllocator::teardown` consumes
    /// it.
    alloc: Option<HugeAllocator>,
    sessions: Vec<Session>,
    free_session_nums: Vec<u16>,
    handlers: HashMap<u8, Handler>,
    handlers_locked: bool,
    sm_handler: SmHandler,
    next_wr_id: u64,
    /// Receive buffers posted to the transport, keyed by `wr_id`, moved
    /// out once their matching completion arrives.
    rx_pool: HashMap<u64, MsgBuffer>,
    /// Receive buffers due for reposting (their prior completion was
    /// already consumed) — drained and reposted at the start of
    /// `replenish_recv_queue`'s next call before any fresh allocation.
    pending_repost: Vec<MsgBuffer>,
    outbound: VecDeque<PendingSend>,
    stats: EndpointStats,
    /// Largest single-packet payload (`mtu - PacketHeader::WIRE_LEN`);
    /// requests/responses larger than this are segmented via
    /// `erpc_transport::frag`.
    max_frag_len: usize,
    /// Set once a `CompletionEvent::Error` is observed; every session is
    /// reset and no further sends are posted.
    terminal: Option<String>,
}

impl RpcEndpoint {
    /// Creates an endpoint bound to `uri`, registering `id` with `nexus`
    /// and the supplied `transport`'s arena.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config.mtu` leaves no room for a
    /// packet header and fragment length prefix, [`Error::Nexus`] if `id` is
    /// already registered on `nexus`, [`Error::Alloc`] if the arena cannot be
    /// reserved, or [`Error::Io`] if the arena cannot be registered with
    /// `transport`.
    pub fn new(
        nexus: Nexus,
        id: EndpointId,
        uri: impl Into<String>,
        config: Config,
        mut transport: Box<dyn Transport>,
        sm_handler: SmHandler,
    ) -> Result<Self, Error> {
        let uri = uri.into();

        let max_frag_len = config.mtu.saturating_sub(PacketHeader::WIRE_LEN);
        if max_frag_len <= frag::TOTAL_LEN_PREFIX {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "mtu {} leaves only {max_frag_len} bytes per packet after the {}-byte header, \
                     which doesn't leave room for the {}-byte fragment length prefix",
                    config.mtu,
                    PacketHeader::WIRE_LEN,
                    frag::TOTAL_LEN_PREFIX,
                ),
            });
        }

        let inbox = nexus
            .register(id, config.session_slots * 4)
            .map_err(Error::Nexus)?;

        let numa_node = config
            .numa_node
            .or_else(|| crate::numa::detect_nic_numa_node(&config.phy_port));
        let alloc_config = HugeAllocatorConfig {
            max_class_bytes: config.max_msg_bytes,
            buffers_per_class: config.buffers_per_class,
            numa_node,
        };
        let mut alloc = HugeAllocator::new(&alloc_config).map_err(Error::Alloc)?;
        alloc.register_with(transport.as_mut()).map_err(Error::Io)?;

        let session_slots = config.session_slots;
        let sessions = (0..MAX_SESSIONS)
            .map(|i| {
                #[expect(clippy::cast_possible_truncation, reason = "i < MAX_SESSIONS <= u16::MAX")]
                Session::new(i as u16, session_slots)
            })
            .collect();
        #[expect(clippy::cast_possible_truncation, reason = "MAX_SESSIONS <= u16::MAX")]
        let free_session_nums: Vec<u16> = (0..MAX_SESSIONS as u16).rev().collect();

        let mut endpoint = Self {
            id,
            uri,
            config,
            nexus,
            inbox,
            transport,
            alloc: Some(alloc),
            sessions,
            free_session_nums,
            handlers: HashMap::new(),
            handlers_locked: false,
            sm_handler,
            next_wr_id: 0,
            rx_pool: HashMap::new(),
            pending_repost: Vec::new(),
            outbound: VecDeque::new(),
            stats: EndpointStats::default(),
            max_frag_len,
            terminal: None,
        };
        endpoint.replenish_recv_queue();
        Ok(endpoint)
    }

    fn arena(&mut self) -> &mut HugeAllocator {
        self.alloc.as_mut().expect("allocator present until teardown")
    }

    /// This endpoint's process-local ID.
    #[must_use]
    pub const fn id(&self) -> EndpointId {
        self.id
    }

    /// The URI this endpoint was constructed with.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Slow-path bookkeeping counters accumulated so far.
    #[must_use]
    pub const fn stats(&self) -> EndpointStats {
        self.stats
    }

    /// Whether a [`CompletionEvent::Error`] has put this endpoint into a
    /// terminal state; every session has been reset and no further sends
    /// will be posted.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    fn acquire_session_num(&mut self) -> Result<u16, Error> {
        self.free_session_nums.pop().ok_or(Error::NoFreeSession)
    }

    /// Allocates an arena-backed buffer of at least `n_bytes`.
    ///
    /// # Errors
    ///
    /// See [`erpc_alloc::AllocError`].
    pub fn alloc_msg_buffer(&mut self, n_bytes: usize) -> Result<MsgBuffer, Error> {
        self.arena().alloc(n_bytes).map_err(Error::Alloc)
    }

    /// Returns a buffer to the arena.
    ///
    /// # Errors
    ///
    /// See [`erpc_alloc::AllocError`].
    pub fn free_msg_buffer(&mut self, buf: MsgBuffer) -> Result<(), Error> {
        self.arena().free(buf).map_err(Error::Alloc)
    }

    /// Registers a handler for `req_type`, overwriting any previous
    /// registration.
    ///
    /// # Panics
    ///
    /// Panics if called after this endpoint's first `run_event_loop` call
    /// — handler registration is a setup-time-only operation, the same way
    /// `spec.md` §4.3 scopes the handler table to construction.
    pub fn register_request_handler(&mut self, req_type: u8, handler: Handler) {
        assert!(
            !self.handlers_locked,
            "request handlers must be registered before the first run_event_loop call"
        );
        self.handlers.insert(req_type, handler);
    }

    /// Begins establishing a session to `remote_endpoint_id` at
    /// `remote_uri`. Returns the reserved session number synchronously;
    /// completion is signaled asynchronously to the `sm_handler` with
    /// [`SmEvent::Connected`] or [`SmEvent::ConnectFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFreeSession`] if every session number is in use,
    /// or [`Error::Nexus`] if the initial `ConnectReq` could not be sent.
    pub fn create_session(
        &mut self,
        remote_uri: impl Into<String>,
        remote_endpoint_id: EndpointId,
    ) -> Result<u16, Error> {
        let remote_uri = remote_uri.into();
        let session_num = self.acquire_session_num()?;
        {
            let session = &mut self.sessions[usize::from(session_num)];
            session.reset_for_reuse();
            session.remote_uri = remote_uri.clone();
            session.remote_endpoint_id = remote_endpoint_id;
            session.state = SessionState::ConnectInProgress;
            session.setup_deadline =
                Some(Instant::now() + Duration::from_micros(self.config.setup_timeout_us));
        }
        let req = ManagementPacket {
            kind: PacketKind::ConnectReq,
            source_uri: self.uri.clone(),
            source_endpoint_id: self.id,
            source_session_num: session_num,
            dest_endpoint_id: remote_endpoint_id,
            dest_session_num: 0,
            nic_addr: Vec::new(),
        };
        if let Err(err) = self.nexus.send(&remote_uri, &req) {
            let session = &mut self.sessions[usize::from(session_num)];
            session.state = SessionState::Disconnected;
            self.free_session_nums.push(session_num);
            return Err(Error::Nexus(err));
        }
        Ok(session_num)
    }

    /// Begins tearing down `session_num`. Asynchronous: a
    /// [`SmEvent::Disconnected`] follows once the peer acknowledges, or
    /// once the setup deadline forces the teardown through.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSession`] or [`Error::SessionNotConnected`].
    pub fn destroy_session(&mut self, session_num: u16) -> Result<(), Error> {
        let Some(session) = self.sessions.get_mut(usize::from(session_num)) else {
            return Err(Error::UnknownSession { session_num });
        };
        if session.state != SessionState::Connected {
            return Err(Error::SessionNotConnected { session_num });
        }
        session.state = SessionState::DisconnectInProgress;
        session.setup_deadline =
            Some(Instant::now() + Duration::from_micros(self.config.setup_timeout_us));
        let remote_uri = session.remote_uri.clone();
        let remote_endpoint_id = session.remote_endpoint_id;
        let remote_session_num = session.remote_session_num;

        let req = ManagementPacket {
            kind: PacketKind::DisconnectReq,
            source_uri: self.uri.clone(),
            source_endpoint_id: self.id,
            source_session_num: session_num,
            dest_endpoint_id: remote_endpoint_id,
            dest_session_num: remote_session_num,
            nic_addr: Vec::new(),
        };
        if let Err(err) = self.nexus.send(&remote_uri, &req) {
            warn!(error = %err, session_num, "failed to send DisconnectReq, relying on setup timeout");
        }
        Ok(())
    }

    /// Enqueues a request on `session_num`. Returns synchronously; `cont`
    /// fires on a later `run_event_loop` call once the response lands (or
    /// the request is abandoned for a `SessionReset`).
    ///
    /// Only the endpoint that called `create_session` should call this on
    /// that session: a slot's residue class is shared between locally
    /// enqueued requests and requests the other endpoint sent *to* this
    /// session, so an endpoint that both enqueues its own requests and
    /// serves incoming ones on the same session can collide the two roles
    /// on the same slot. Build a second session in the other direction if
    /// both endpoints need to originate requests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSession`], [`Error::SessionNotConnected`],
    /// [`Error::NoCredits`], or an allocator/fragmentation error — in every
    /// case both buffers are handed back via [`EnqueueRequestError`].
    pub fn enqueue_request(
        &mut self,
        session_num: u16,
        req_type: u8,
        req_buf: MsgBuffer,
        resp_buf: MsgBuffer,
        tag: u64,
        cont: Continuation,
    ) -> Result<RequestHandle, EnqueueRequestError> {
        let Some(session) = self.sessions.get(usize::from(session_num)) else {
            return Err(EnqueueRequestError {
                error: Error::UnknownSession { session_num },
                req_buf,
                resp_buf,
            });
        };
        if session.state != SessionState::Connected {
            return Err(EnqueueRequestError {
                error: Error::SessionNotConnected { session_num },
                req_buf,
                resp_buf,
            });
        }

        let session = &mut self.sessions[usize::from(session_num)];
        if let Err(err) = session.credit.try_consume() {
            self.stats.credit_rejections += 1;
            return Err(EnqueueRequestError {
                error: Error::NoCredits {
                    session_num,
                    used: err.used,
                    cap: err.cap,
                },
                req_buf,
                resp_buf,
            });
        }

        let fragments = if req_buf.len() > self.max_frag_len {
            match frag::split(self.max_frag_len, req_buf.payload()) {
                Ok(frags) => Some(frags),
                Err(err) => {
                    session.credit.release();
                    return Err(EnqueueRequestError {
                        error: Error::FatalTransport { reason: err.to_string() },
                        req_buf,
                        resp_buf,
                    });
                }
            }
        } else {
            None
        };
        #[expect(clippy::cast_possible_truncation, reason = "bounded by u16::MAX in frag::split")]
        let total_pkts = fragments.as_ref().map_or(1, |frags| frags.len() as u16);

        let (slot_idx, request_num) = session.next_client_slot();
        session.slots[slot_idx] = SlotRole::Client(ClientSlot {
            request_num,
            req_type,
            req_buf,
            resp_buf,
            tag,
            cont,
            fragments,
            total_pkts,
            frag_rx: None,
            sent_at: Instant::now(),
            retransmitted: false,
        });

        self.outbound.push_back(PendingSend::Request { session_num, slot_idx });
        self.stats.requests_enqueued += 1;
        Ok(RequestHandle { session_num, slot_idx, request_num })
    }

    /// Enqueues the response to a previously dispatched request, per
    /// `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSession`] or [`Error::StaleRequestHandle`]
    /// if the slot has moved on (the request was already answered, or the
    /// session reset), or a fragmentation error — in every case the buffer
    /// is handed back via [`EnqueueResponseError`].
    pub fn enqueue_response(
        &mut self,
        handle: RequestHandle,
        resp_buf: MsgBuffer,
    ) -> Result<(), EnqueueResponseError> {
        let RequestHandle { session_num, slot_idx, request_num } = handle;
        let Some(session) = self.sessions.get_mut(usize::from(session_num)) else {
            return Err(EnqueueResponseError {
                error: Error::UnknownSession { session_num },
                resp_buf,
            });
        };
        let stale = match &session.slots[slot_idx] {
            SlotRole::Server(server) => server.request_num != request_num || server.response.is_some(),
            _ => true,
        };
        if stale {
            return Err(EnqueueResponseError {
                error: Error::StaleRequestHandle { session_num },
                resp_buf,
            });
        }

        let fragments = if resp_buf.len() > self.max_frag_len {
            match frag::split(self.max_frag_len, resp_buf.payload()) {
                Ok(frags) => Some(frags),
                Err(err) => {
                    return Err(EnqueueResponseError {
                        error: Error::FatalTransport { reason: err.to_string() },
                        resp_buf,
                    });
                }
            }
        } else {
            None
        };
        #[expect(clippy::cast_possible_truncation, reason = "bounded by u16::MAX in frag::split")]
        let total_pkts = fragments.as_ref().map_or(1, |frags| frags.len() as u16);

        let SlotRole::Server(server) = &mut session.slots[slot_idx] else {
            unreachable!("checked above");
        };
        server.response = Some(ServerResponse { resp_buf, fragments, total_pkts });

        self.outbound.push_back(PendingSend::Response { session_num, slot_idx });
        self.stats.responses_enqueued += 1;
        Ok(())
    }

    /// Runs the event loop for up to `max_us` microseconds, or until a
    /// pass over every step (`spec.md` §4.5) does no work, whichever comes
    /// first.
    pub fn run_event_loop(&mut self, max_us: u64) {
        self.handlers_locked = true;
        let deadline = Instant::now() + Duration::from_micros(max_us);
        loop {
            let mut did_work = false;
            did_work |= self.poll_completions_once();
            did_work |= self.process_outbound();
            did_work |= self.scan_deadlines();
            did_work |= self.drain_management_inbox();
            self.replenish_recv_queue();

            if self.terminal.is_some() || Instant::now() >= deadline || !did_work {
                break;
            }
        }
    }

    fn poll_completions_once(&mut self) -> bool {
        let events = self.transport.poll_completions(self.config.rx_ring_size);
        if events.is_empty() {
            return false;
        }
        for event in events {
            match event {
                CompletionEvent::Send { wr_id } => {
                    trace!(wr_id, "send completion observed");
                }
                CompletionEvent::Recv { wr_id, len } => self.handle_recv_completion(wr_id, len),
                CompletionEvent::Error { reason } => self.enter_terminal_state(reason),
            }
        }
        true
    }

    fn handle_recv_completion(&mut self, wr_id: u64, len: usize) {
        let Some(mut buf) = self.rx_pool.remove(&wr_id) else {
            warn!(wr_id, "completion for unknown receive buffer, dropping");
            return;
        };
        buf.set_len(len.saturating_sub(erpc_alloc::HEADROOM).min(buf.capacity()));

        let wire = buf.wire_view();
        let header_and_payload = &wire[..len.min(wire.len())];
        let result = (|| -> Result<(), String> {
            let header = PacketHeader::decode(header_and_payload).map_err(|err| err.to_string())?;
            let payload = &header_and_payload[PacketHeader::WIRE_LEN..];
            self.dispatch_packet(header, payload);
            Ok(())
        })();
        if let Err(err) = result {
            self.stats.management_packets_dropped += 1;
            trace!(error = %err, "dropping malformed data packet");
        }

        buf.reset();
        self.pending_repost.push(buf);
    }

    fn dispatch_packet(&mut self, header: PacketHeader, payload: &[u8]) {
        let session_num = header.session_num;
        if self.sessions.get(usize::from(session_num)).is_none() {
            self.stats.management_packets_dropped += 1;
            return;
        }
        let request_num = RequestNum::new(header.request_num);
        let slot_idx = self.sessions[usize::from(session_num)].slot_index_for(request_num);

        match header.packet_type {
            PacketType::SmallRequest | PacketType::LargeRequestFirst | PacketType::LargeRequestContinuation => {
                self.handle_request_packet(session_num, slot_idx, request_num, header, payload);
            }
            PacketType::SmallResponse | PacketType::LargeResponseFirst | PacketType::LargeResponseContinuation => {
                self.handle_response_packet(session_num, slot_idx, request_num, header, payload);
            }
            PacketType::RequestForResponse => {
                self.handle_request_for_response(session_num, slot_idx, request_num);
            }
            PacketType::ExplicitCredit => {
                // Reserved for a future receiver-side credit-withholding
                // scheme (`spec.md` §4.4): this design's credit window is a
                // fixed local slot count known to both ends from `Config`
                // rather than one negotiated over the wire, so there is
                // nothing for an `ExplicitCredit` grant to carry yet. The
                // wire tag is decoded (never silently misclassified) and
                // dropped rather than omitted from the enum entirely.
                trace!("ExplicitCredit packet received but not yet produced by this implementation, dropping");
            }
        }
    }

    fn handle_request_packet(
        &mut self,
        session_num: u16,
        slot_idx: usize,
        request_num: RequestNum,
        header: PacketHeader,
        payload: &[u8],
    ) {
        let is_new = match &self.sessions[usize::from(session_num)].slots[slot_idx] {
            SlotRole::Server(server) => server.request_num != request_num,
            _ => true,
        };
        if is_new {
            let old = std::mem::replace(
                &mut self.sessions[usize::from(session_num)].slots[slot_idx],
                SlotRole::Server(ServerSlot {
                    request_num,
                    req_type: header.req_type,
                    response: None,
                    frag_rx: None,
                }),
            );
            // The credit window guarantees this residue class's previous
            // occupant is fully retired (its response acked or its
            // continuation already fired) before a new request number
            // reaches it, but the cached response buffer still needs to be
            // returned to the arena here — nothing else ever frees it.
            if let SlotRole::Server(ServerSlot { response: Some(response), .. }) = old {
                if let Err(err) = self.arena().free(response.resp_buf) {
                    error!(error = %err, "failed to free superseded response buffer");
                }
            }
        }

        let body = match header.packet_type {
            PacketType::SmallRequest => Some(payload.to_vec()),
            PacketType::LargeRequestFirst | PacketType::LargeRequestContinuation => {
                let session = &mut self.sessions[usize::from(session_num)];
                let SlotRole::Server(server) = &mut session.slots[slot_idx] else {
                    return;
                };
                if server.frag_rx.is_none() && header.packet_type == PacketType::LargeRequestFirst {
                    server.frag_rx = Some(FragmentReceiver::new());
                }
                let Some(frag_rx) = &mut server.frag_rx else {
                    self.resend_cached_response(session_num, slot_idx);
                    return;
                };
                match frag_rx.reassemble(request_num, header.total_pkts, header.this_pkt, payload, self.max_frag_len) {
                    Ok(Reassembled::Complete(bytes)) => {
                        server.frag_rx = None;
                        Some(bytes)
                    }
                    Ok(Reassembled::Incomplete) => None,
                    Err(err) => {
                        trace!(error = %err, "request fragment rejected");
                        None
                    }
                }
            }
            _ => unreachable!("dispatch_packet only routes request packet types here"),
        };

        let Some(body) = body else {
            self.resend_cached_response(session_num, slot_idx);
            return;
        };

        let already_handled = matches!(
            &self.sessions[usize::from(session_num)].slots[slot_idx],
            SlotRole::Server(server) if server.response.is_some()
        );
        if already_handled {
            self.resend_cached_response(session_num, slot_idx);
            return;
        }

        let mut req_buf = match self.arena().alloc(body.len()) {
            Ok(mut buf) => {
                buf.write_area()[..body.len()].copy_from_slice(&body);
                buf.set_len(body.len());
                buf
            }
            Err(err) => {
                warn!(error = %err, "could not allocate request buffer, dropping request");
                return;
            }
        };

        let req_type = header.req_type;
        let handle = RequestHandle { session_num, slot_idx, request_num };

        let Some(mut handler) = self.handlers.remove(&req_type) else {
            warn!(req_type, "no handler registered for request type, dropping");
            if let Err(err) = self.arena().free(req_buf) {
                error!(error = %err, "failed to free undispatched request buffer");
            }
            return;
        };
        req_buf.mark_complete();
        handler(self, handle, req_buf);
        self.handlers.insert(req_type, handler);
    }

    /// Server-side handling of a [`PacketType::RequestForResponse`]: a
    /// client's cheap way to re-pull a large response that stalled partway
    /// through reassembly, without the server needing to observe a full
    /// retransmitted request first.
    fn handle_request_for_response(&mut self, session_num: u16, slot_idx: usize, request_num: RequestNum) {
        let matches_slot = matches!(
            &self.sessions[usize::from(session_num)].slots[slot_idx],
            SlotRole::Server(server) if server.request_num == request_num
        );
        if matches_slot {
            self.resend_cached_response(session_num, slot_idx);
        }
    }

    fn resend_cached_response(&mut self, session_num: u16, slot_idx: usize) {
        let has_response = matches!(
            &self.sessions[usize::from(session_num)].slots[slot_idx],
            SlotRole::Server(server) if server.response.is_some()
        );
        if has_response {
            self.outbound.push_back(PendingSend::Response { session_num, slot_idx });
        }
    }

    fn handle_response_packet(
        &mut self,
        session_num: u16,
        slot_idx: usize,
        request_num: RequestNum,
        header: PacketHeader,
        payload: &[u8],
    ) {
        let matches_slot = matches!(
            &self.sessions[usize::from(session_num)].slots[slot_idx],
            SlotRole::Client(client) if client.request_num == request_num
        );
        if !matches_slot {
            trace!(session_num, slot_idx, "response for unknown/stale client slot, dropping");
            return;
        }

        let body = match header.packet_type {
            PacketType::SmallResponse => Some(payload.to_vec()),
            PacketType::LargeResponseFirst | PacketType::LargeResponseContinuation => {
                let session = &mut self.sessions[usize::from(session_num)];
                let SlotRole::Client(client) = &mut session.slots[slot_idx] else {
                    return;
                };
                if client.frag_rx.is_none() && header.packet_type == PacketType::LargeResponseFirst {
                    client.frag_rx = Some(FragmentReceiver::new());
                }
                let Some(frag_rx) = &mut client.frag_rx else {
                    return;
                };
                match frag_rx.reassemble(request_num, header.total_pkts, header.this_pkt, payload, self.max_frag_len) {
                    Ok(Reassembled::Complete(bytes)) => {
                        client.frag_rx = None;
                        Some(bytes)
                    }
                    Ok(Reassembled::Incomplete) => None,
                    Err(err) => {
                        trace!(error = %err, "response fragment rejected");
                        None
                    }
                }
            }
            _ => unreachable!("dispatch_packet only routes response packet types here"),
        };
        let Some(body) = body else {
            return;
        };

        self.complete_client_slot(session_num, slot_idx, Ok(body));
    }

    fn complete_client_slot(&mut self, session_num: u16, slot_idx: usize, outcome: Result<Vec<u8>, Error>) {
        let session = &mut self.sessions[usize::from(session_num)];
        session.deadlines.remove(slot_idx as u32, Instant::now());
        let SlotRole::Client(client) = std::mem::replace(&mut session.slots[slot_idx], SlotRole::Idle) else {
            return;
        };
        session.credit.release();
        if !client.retransmitted {
            session.rtt.update(Instant::now().saturating_duration_since(client.sent_at));
        }

        let ClientSlot { req_buf, mut resp_buf, tag, cont, .. } = client;
        let result = match outcome {
            Ok(body) if body.len() > resp_buf.capacity() => {
                Err(Error::ResponseTooLarge { actual: body.len(), reserved: resp_buf.capacity() })
            }
            Ok(body) => {
                resp_buf.write_area()[..body.len()].copy_from_slice(&body);
                resp_buf.set_len(body.len());
                resp_buf.mark_complete();
                Ok(())
            }
            Err(err) => Err(err),
        };
        cont(Completion { req_buf, resp_buf, tag, result });
    }

    /// Drains the outbound FIFO, posting every queued send to the
    /// transport.
    fn process_outbound(&mut self) -> bool {
        if self.outbound.is_empty() {
            return false;
        }
        while let Some(job) = self.outbound.pop_front() {
            match job {
                PendingSend::Request { session_num, slot_idx } => self.send_client_slot(session_num, slot_idx),
                PendingSend::Response { session_num, slot_idx } => self.send_server_slot(session_num, slot_idx),
                PendingSend::RequestForResponse { session_num, slot_idx } => {
                    self.send_request_for_response(session_num, slot_idx);
                }
            }
        }
        self.transport.tx_flush();
        true
    }

    fn send_client_slot(&mut self, session_num: u16, slot_idx: usize) {
        let wr_id = self.next_wr_id;
        self.next_wr_id += 1;

        let session = &mut self.sessions[usize::from(session_num)];
        let remote_session_num = session.remote_session_num;
        let pto = session.rtt.pto();
        let SlotRole::Client(client) = &mut session.slots[slot_idx] else {
            return;
        };
        client.sent_at = Instant::now();

        match &client.fragments {
            None => {
                let header = PacketHeader {
                    session_num: remote_session_num,
                    request_num: client.request_num.0,
                    packet_type: PacketType::SmallRequest,
                    flags: 0,
                    total_pkts: 1,
                    this_pkt: 0,
                    payload_len: client.req_buf.len().min(u64::from(u16::MAX) as usize) as u16,
                    req_type: client.req_type,
                };
                header.encode(client.req_buf.headroom_mut());
                let data = client.req_buf.wire_view();
                self.transport.post_send(&[OutgoingPacket { data, wr_id }]);
            }
            Some(fragments) => {
                for (packet_num, bytes) in fragments {
                    let packet_type = if packet_num.0 == 0 {
                        PacketType::LargeRequestFirst
                    } else {
                        PacketType::LargeRequestContinuation
                    };
                    let header = PacketHeader {
                        session_num: remote_session_num,
                        request_num: client.request_num.0,
                        packet_type,
                        flags: 0,
                        total_pkts: client.total_pkts,
                        this_pkt: packet_num.0,
                        #[expect(clippy::cast_possible_truncation, reason = "fragments are at most max_frag_len")]
                        payload_len: bytes.len() as u16,
                        req_type: client.req_type,
                    };
                    let mut wire = vec![0u8; PacketHeader::WIRE_LEN + bytes.len()];
                    header.encode(&mut wire[..PacketHeader::WIRE_LEN]);
                    wire[PacketHeader::WIRE_LEN..].copy_from_slice(bytes);
                    self.transport.post_send(&[OutgoingPacket { data: &wire, wr_id }]);
                }
            }
        }

        session.deadlines.insert(u32::try_from(slot_idx).expect("slot_idx fits u32"), Instant::now() + pto);
    }

    fn send_server_slot(&mut self, session_num: u16, slot_idx: usize) {
        let wr_id = self.next_wr_id;
        self.next_wr_id += 1;

        let session = &mut self.sessions[usize::from(session_num)];
        let remote_session_num = session.remote_session_num;
        let SlotRole::Server(server) = &mut session.slots[slot_idx] else {
            return;
        };
        let request_num = server.request_num;
        let Some(response) = &mut server.response else {
            return;
        };

        match &response.fragments {
            None => {
                let header = PacketHeader {
                    session_num: remote_session_num,
                    request_num: request_num.0,
                    packet_type: PacketType::SmallResponse,
                    flags: 0,
                    total_pkts: 1,
                    this_pkt: 0,
                    #[expect(clippy::cast_possible_truncation, reason = "checked against max_frag_len at enqueue time")]
                    payload_len: response.resp_buf.len() as u16,
                    req_type: 0,
                };
                header.encode(response.resp_buf.headroom_mut());
                let data = response.resp_buf.wire_view();
                self.transport.post_send(&[OutgoingPacket { data, wr_id }]);
            }
            Some(fragments) => {
                for (packet_num, bytes) in fragments {
                    let packet_type = if packet_num.0 == 0 {
                        PacketType::LargeResponseFirst
                    } else {
                        PacketType::LargeResponseContinuation
                    };
                    let header = PacketHeader {
                        session_num: remote_session_num,
                        request_num: request_num.0,
                        packet_type,
                        flags: 0,
                        total_pkts: response.total_pkts,
                        this_pkt: packet_num.0,
                        #[expect(clippy::cast_possible_truncation, reason = "fragments are at most max_frag_len")]
                        payload_len: bytes.len() as u16,
                        req_type: 0,
                    };
                    let mut wire = vec![0u8; PacketHeader::WIRE_LEN + bytes.len()];
                    header.encode(&mut wire[..PacketHeader::WIRE_LEN]);
                    wire[PacketHeader::WIRE_LEN..].copy_from_slice(bytes);
                    self.transport.post_send(&[OutgoingPacket { data: &wire, wr_id }]);
                }
            }
        }
    }

    /// Re-pulls a stalled large response with a small header-only packet
    /// instead of reposting the (possibly much larger) original request.
    fn send_request_for_response(&mut self, session_num: u16, slot_idx: usize) {
        let wr_id = self.next_wr_id;
        self.next_wr_id += 1;

        let session = &mut self.sessions[usize::from(session_num)];
        let remote_session_num = session.remote_session_num;
        let pto = session.rtt.pto();
        let SlotRole::Client(client) = &mut session.slots[slot_idx] else {
            return;
        };
        client.sent_at = Instant::now();
        let request_num = client.request_num;

        let header = PacketHeader {
            session_num: remote_session_num,
            request_num: request_num.0,
            packet_type: PacketType::RequestForResponse,
            flags: 0,
            total_pkts: 1,
            this_pkt: 0,
            payload_len: 0,
            req_type: 0,
        };
        let mut wire = [0u8; PacketHeader::WIRE_LEN];
        header.encode(&mut wire);
        self.transport.post_send(&[OutgoingPacket { data: &wire, wr_id }]);

        session.deadlines.insert(u32::try_from(slot_idx).expect("slot_idx fits u32"), Instant::now() + pto);
    }

    /// Scans setup deadlines and per-slot retransmission deadlines,
    /// advancing timed-out sessions and re-enqueuing timed-out slots.
    fn scan_deadlines(&mut self) -> bool {
        let now = Instant::now();
        let mut did_work = false;

        for session_num in 0..u16::try_from(self.sessions.len()).expect("MAX_SESSIONS fits u16") {
            let (state, timed_out) = {
                let session = &self.sessions[usize::from(session_num)];
                (session.state, session.setup_deadline.is_some_and(|deadline| now >= deadline))
            };
            if !timed_out {
                continue;
            }
            did_work = true;
            match state {
                SessionState::ConnectInProgress => {
                    let uri = self.sessions[usize::from(session_num)].remote_uri.clone();
                    self.free_session_nums.push(session_num);
                    let session = &mut self.sessions[usize::from(session_num)];
                    session.state = SessionState::Disconnected;
                    session.setup_deadline = None;
                    (self.sm_handler)(SmEvent::ConnectFailed {
                        session_num,
                        error: Error::SetupTimeout { uri },
                    });
                }
                SessionState::DisconnectInProgress => self.finalize_disconnect(session_num),
                _ => {}
            }
        }

        let mut to_retransmit = Vec::new();
        for (session_num, session) in self.sessions.iter().enumerate() {
            if session.state != SessionState::Connected {
                continue;
            }
            for (slot_idx, deadline) in session.deadlines.iter() {
                if *deadline <= now {
                    #[expect(clippy::cast_possible_truncation, reason = "session_num < MAX_SESSIONS <= u16::MAX")]
                    to_retransmit.push((session_num as u16, slot_idx as usize));
                }
            }
        }
        for (session_num, slot_idx) in to_retransmit {
            did_work = true;
            let session = &mut self.sessions[usize::from(session_num)];
            if let SlotRole::Client(client) = &mut session.slots[slot_idx] {
                client.retransmitted = true;
                self.stats.retransmissions += 1;
                if client.frag_rx.is_some() {
                    // A large response already started reassembling; pull
                    // the rest instead of resending the whole request.
                    self.outbound.push_back(PendingSend::RequestForResponse { session_num, slot_idx });
                } else {
                    self.outbound.push_back(PendingSend::Request { session_num, slot_idx });
                }
            }
        }

        did_work
    }

    fn drain_management_inbox(&mut self) -> bool {
        let mut processed = false;
        while let Some(packet) = self.inbox.try_pop() {
            processed = true;
            self.handle_management_packet(packet);
        }
        processed
    }

    fn handle_management_packet(&mut self, packet: ManagementPacket) {
        match packet.kind {
            PacketKind::ConnectReq => self.handle_connect_req(packet),
            PacketKind::ConnectResp => self.handle_connect_resp(packet),
            PacketKind::DisconnectReq => self.handle_disconnect_req(packet),
            PacketKind::DisconnectResp => self.handle_disconnect_resp(packet),
        }
    }

    /// Auto-accepts every inbound `ConnectReq`: the wire protocol has no
    /// "reject" packet kind (see `erpc_nexus::wire::PacketKind`), so
    /// admission control is out of scope — the only way a connect
    /// attempt fails is [`Error::SetupTimeout`] on the requester's side.
    fn handle_connect_req(&mut self, packet: ManagementPacket) {
        let session_num = match self.acquire_session_num() {
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "rejecting inbound connect: no free session numbers");
                return;
            }
        };
        {
            let session = &mut self.sessions[usize::from(session_num)];
            session.reset_for_reuse();
            session.remote_uri = packet.source_uri.clone();
            session.remote_endpoint_id = packet.source_endpoint_id;
            session.remote_session_num = packet.source_session_num;
            session.state = SessionState::Connected;
        }
        let resp = ManagementPacket {
            kind: PacketKind::ConnectResp,
            source_uri: self.uri.clone(),
            source_endpoint_id: self.id,
            source_session_num: session_num,
            dest_endpoint_id: packet.source_endpoint_id,
            dest_session_num: packet.source_session_num,
            nic_addr: Vec::new(),
        };
        if let Err(err) = self.nexus.send(&packet.source_uri, &resp) {
            warn!(error = %err, "failed to send ConnectResp");
        }
        self.stats.sessions_connected += 1;
        (self.sm_handler)(SmEvent::Connected { session_num });
    }

    fn handle_connect_resp(&mut self, packet: ManagementPacket) {
        let session_num = packet.dest_session_num;
        let Some(session) = self.sessions.get_mut(usize::from(session_num)) else {
            return;
        };
        if session.state != SessionState::ConnectInProgress {
            return;
        }
        session.remote_session_num = packet.source_session_num;
        session.state = SessionState::Connected;
        session.setup_deadline = None;
        self.stats.sessions_connected += 1;
        (self.sm_handler)(SmEvent::Connected { session_num });
    }

    fn handle_disconnect_req(&mut self, packet: ManagementPacket) {
        let session_num = packet.dest_session_num;
        if self.sessions.get(usize::from(session_num)).is_none() {
            return;
        }
        self.cancel_session_slots(session_num);
        let resp = ManagementPacket {
            kind: PacketKind::DisconnectResp,
            source_uri: self.uri.clone(),
            source_endpoint_id: self.id,
            source_session_num: session_num,
            dest_endpoint_id: packet.source_endpoint_id,
            dest_session_num: packet.source_session_num,
            nic_addr: Vec::new(),
        };
        if let Err(err) = self.nexus.send(&packet.source_uri, &resp) {
            warn!(error = %err, "failed to send DisconnectResp");
        }
        let session = &mut self.sessions[usize::from(session_num)];
        session.state = SessionState::Disconnected;
        self.free_session_nums.push(session_num);
        self.stats.sessions_disconnected += 1;
        (self.sm_handler)(SmEvent::Disconnected { session_num });
    }

    fn handle_disconnect_resp(&mut self, packet: ManagementPacket) {
        let session_num = packet.dest_session_num;
        let Some(session) = self.sessions.get(usize::from(session_num)) else {
            return;
        };
        if session.state != SessionState::DisconnectInProgress {
            return;
        }
        self.finalize_disconnect(session_num);
    }

    fn finalize_disconnect(&mut self, session_num: u16) {
        self.cancel_session_slots(session_num);
        let session = &mut self.sessions[usize::from(session_num)];
        session.state = SessionState::Disconnected;
        session.setup_deadline = None;
        self.free_session_nums.push(session_num);
        self.stats.sessions_disconnected += 1;
        (self.sm_handler)(SmEvent::Disconnected { session_num });
    }

    /// Cancels every outstanding slot in `session_num`: client
    /// continuations fire with [`Error::SessionReset`], cached server
    /// responses are freed back to the arena.
    fn cancel_session_slots(&mut self, session_num: u16) {
        let session = &mut self.sessions[usize::from(session_num)];
        let n = session.slots.len();
        session.deadlines = erpc_transport::SeqBuf::new(n, Instant::now());
        let slots = std::mem::replace(&mut session.slots, (0..n).map(|_| SlotRole::Idle).collect());

        for slot in slots {
            match slot {
                SlotRole::Client(client) => {
                    let ClientSlot { req_buf, resp_buf, tag, cont, .. } = client;
                    cont(Completion { req_buf, resp_buf, tag, result: Err(Error::SessionReset { session_num }) });
                }
                SlotRole::Server(server) => {
                    if let Some(response) = server.response {
                        if let Err(err) = self.arena().free(response.resp_buf) {
                            warn!(error = %err, "failed to free cached response buffer on session reset");
                        }
                    }
                }
                SlotRole::Idle => {}
            }
        }
        self.stats.sessions_reset += 1;
    }

    fn enter_terminal_state(&mut self, reason: String) {
        if self.terminal.is_some() {
            return;
        }
        error!(reason = %reason, "transport reported a fatal error; resetting every session");
        self.terminal = Some(reason);

        for session_num in 0..u16::try_from(self.sessions.len()).expect("MAX_SESSIONS fits u16") {
            let state = self.sessions[usize::from(session_num)].state;
            if state == SessionState::Disconnected {
                continue;
            }
            self.cancel_session_slots(session_num);
            let session = &mut self.sessions[usize::from(session_num)];
            session.state = SessionState::Disconnected;
            session.setup_deadline = None;
            self.free_session_nums.push(session_num);
            (self.sm_handler)(SmEvent::Disconnected { session_num });
        }
    }

    /// Reposts receive buffers pending from a prior completion, then tops
    /// up the receive queue to `rx_ring_size` with fresh arena allocations.
    fn replenish_recv_queue(&mut self) {
        let reposts = std::mem::take(&mut self.pending_repost);
        for mut buf in reposts {
            let wr_id = self.next_wr_id;
            self.next_wr_id += 1;
            {
                let mut slots = [RecvSlot { buf: buf.wire_view_capacity(), wr_id }];
                self.transport.post_recv(&mut slots);
            }
            self.rx_pool.insert(wr_id, buf);
        }

        let target = self.config.rx_ring_size;
        while self.rx_pool.len() < target {
            let payload_cap = self.config.mtu.saturating_sub(erpc_alloc::HEADROOM);
            let mut buf = match self.arena().alloc(payload_cap) {
                Ok(buf) => buf,
                Err(err) => {
                    warn!(error = %err, "could not allocate a receive buffer, leaving rx ring under-filled");
                    break;
                }
            };
            let wr_id = self.next_wr_id;
            self.next_wr_id += 1;
            {
                let mut slots = [RecvSlot { buf: buf.wire_view_capacity(), wr_id }];
                self.transport.post_recv(&mut slots);
            }
            self.rx_pool.insert(wr_id, buf);
        }
    }
}

impl Drop for RpcEndpoint {
    fn drop(&mut self) {
        self.nexus.deregister(self.id);
        if let Some(alloc) = self.alloc.take() {
            alloc.teardown(self.transport.as_mut());
        }
    }
}
