//! Process-wide out-of-band session management singleton.
//!
//! Owns one UDP socket per process used only for session setup/teardown
//! handshakes; the data plane never touches this crate. A background
//! thread reads datagrams, decodes them with [`wire::ManagementPacket`],
//! and routes each one to the addressed endpoint's inbox — a lock-free
//! SPSC ring buffer (`ringbuf::HeapRb`, split into producer/consumer
//! halves) so the endpoint's own thread can drain it from inside
//! `run_event_loop` without taking a lock, matching the single inter-
//! thread primitive the scheduling model allows on the hot path.
//!
//! Session setup itself (the state transition on receipt of a
//! `ConnectResp`/`DisconnectResp`) happens on the endpoint's own thread,
//! not here — this crate only delivers packets.

pub mod wire;

use std::{
    collections::HashMap,
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
    thread::JoinHandle,
    time::Duration,
};

use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

pub use wire::{ManagementPacket, PacketKind, WireError};

/// Identifies one `RpcEndpoint` within its process.
pub type EndpointId = u8;

/// Longest a single `recv_from` call will read; comfortably above the
/// largest encodable [`ManagementPacket`] ([`wire::MAX_URI_LEN`] +
/// [`wire::MAX_NIC_ADDR_LEN`] + fixed fields).
const RECV_BUF_LEN: usize = 512;

/// How often the background thread wakes to check for shutdown even with
/// no datagram pending.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Registering or sending through a [`Nexus`] failed.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum NexusError {
    /// Could not bind the management UDP socket.
    #[display("failed to bind nexus socket on port {port}: {source}")]
    Bind {
        /// Port that failed to bind.
        port: u16,
        /// Underlying OS error.
        source: io::Error,
    },
    /// `register` was called twice for the same [`EndpointId`] without an
    /// intervening `deregister`.
    #[display("endpoint {id} is already registered with this nexus")]
    AlreadyRegistered {
        /// The colliding ID.
        id: EndpointId,
    },
    /// Sending a management datagram failed at the socket layer.
    #[display("failed to send management packet to {addr}: {source}")]
    Send {
        /// Destination address.
        addr: String,
        /// Underlying OS error.
        source: io::Error,
    },
    /// The destination URI did not resolve to a socket address.
    #[display("could not resolve destination URI {uri:?}: {source}")]
    UnresolvableUri {
        /// The URI that failed to resolve.
        uri: String,
        /// Underlying OS error.
        source: io::Error,
    },
}

/// Consumer half of an endpoint's inbox, handed out by
/// [`Nexus::register`]. Drained on the endpoint's own thread inside
/// `run_event_loop`'s inbox step.
pub type Inbox = HeapCons<ManagementPacket>;

struct Registry {
    endpoints: HashMap<EndpointId, HeapProd<ManagementPacket>>,
}

struct NexusInner {
    socket: UdpSocket,
    registry: Mutex<Registry>,
    shutdown: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a process-wide (or, in tests, standalone) out-of-band session
/// manager. Cheap to clone; clones share the same background thread and
/// socket.
#[derive(Clone)]
pub struct Nexus {
    inner: Arc<NexusInner>,
}

static PROCESS_NEXUS: OnceLock<Mutex<Option<Nexus>>> = OnceLock::new();

impl Nexus {
    /// Returns the process-wide Nexus, binding and starting its
    /// background thread on first call. Every later call on this port
    /// returns a clone of the same handle; `sm_udp_port` is honored only
    /// on the first call in the process's lifetime (subsequent calls'
    /// `sm_udp_port` is ignored with a warning if it differs) — this
    /// mirrors `spec.md` §4.6/§9's "one persistent registry ... per
    /// process, initialized on first endpoint creation."
    ///
    /// # Errors
    ///
    /// Returns [`NexusError::Bind`] if the socket bind fails on first
    /// call.
    pub fn handle(sm_udp_port: u16) -> Result<Self, NexusError> {
        let cell = PROCESS_NEXUS.get_or_init(|| Mutex::new(None));
        let mut guard = cell.lock().expect("nexus singleton mutex poisoned");
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }
        let nexus = Self::new_standalone(sm_udp_port)?;
        *guard = Some(nexus.clone());
        Ok(nexus)
    }

    /// Creates a fresh, independent Nexus bound to its own socket,
    /// bypassing the process-wide singleton. Intended for tests that need
    /// port isolation between unrelated scenarios running in the same
    /// test binary — the real `spec.md` contract is [`Nexus::handle`];
    /// this is the same kind of direct-constructor escape hatch
    /// `aeronet_channel::ChannelIo::pair` offers for test transports that
    /// don't want any shared global state.
    ///
    /// Pass `0` for `sm_udp_port` to let the OS assign an ephemeral port
    /// (see [`Nexus::local_addr`]).
    ///
    /// # Errors
    ///
    /// Returns [`NexusError::Bind`] if the socket bind fails.
    pub fn new_standalone(sm_udp_port: u16) -> Result<Self, NexusError> {
        let socket = UdpSocket::bind(("0.0.0.0", sm_udp_port)).map_err(|source| NexusError::Bind {
            port: sm_udp_port,
            source,
        })?;
        socket
            .set_read_timeout(Some(POLL_INTERVAL))
            .expect("setting a read timeout on a freshly bound socket cannot fail");

        let inner = Arc::new(NexusInner {
            socket,
            registry: Mutex::new(Registry {
                endpoints: HashMap::new(),
            }),
            shutdown: AtomicBool::new(false),
            thread: Mutex::new(None),
        });

        let worker_inner = Arc::clone(&inner);
        let thread = std::thread::Builder::new()
            .name("erpc-nexus".to_owned())
            .spawn(move || background_loop(&worker_inner))
            .expect("spawning the nexus background thread cannot fail on a healthy process");
        *inner.thread.lock().expect("thread handle mutex poisoned") = Some(thread);

        Ok(Self { inner })
    }

    /// The local address this Nexus's socket is bound to.
    ///
    /// # Panics
    ///
    /// Panics if the underlying socket cannot report its local address,
    /// which only happens if the OS socket has been corrupted.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner
            .socket
            .local_addr()
            .expect("bound socket always has a local address")
    }

    /// Registers a new endpoint, returning the consumer half of its
    /// inbox. `capacity` bounds how many undelivered management packets
    /// can queue; once full, newly arriving packets for this endpoint are
    /// dropped until the endpoint drains its inbox (the slow path accepts
    /// this — session setup retries at the application level via
    /// `SetupTimeout`).
    ///
    /// # Errors
    ///
    /// Returns [`NexusError::AlreadyRegistered`] if `id` is already in
    /// use on this Nexus.
    pub fn register(&self, id: EndpointId, capacity: usize) -> Result<Inbox, NexusError> {
        let mut registry = self.inner.registry.lock().expect("registry mutex poisoned");
        if registry.endpoints.contains_key(&id) {
            return Err(NexusError::AlreadyRegistered { id });
        }
        let (prod, cons) = HeapRb::new(capacity).split();
        registry.endpoints.insert(id, prod);
        Ok(cons)
    }

    /// Deregisters an endpoint. Idempotent: deregistering an unknown or
    /// already-deregistered ID is a no-op.
    pub fn deregister(&self, id: EndpointId) {
        let mut registry = self.inner.registry.lock().expect("registry mutex poisoned");
        registry.endpoints.remove(&id);
    }

    /// Sends an out-of-band management packet to `dest_uri`.
    ///
    /// # Errors
    ///
    /// Returns [`NexusError::UnresolvableUri`] if `dest_uri` does not
    /// resolve, or [`NexusError::Send`] if the underlying socket send
    /// fails.
    pub fn send(&self, dest_uri: &str, packet: &ManagementPacket) -> Result<(), NexusError> {
        let addr = dest_uri
            .to_socket_addrs()
            .map_err(|source| NexusError::UnresolvableUri {
                uri: dest_uri.to_owned(),
                source,
            })?
            .next()
            .ok_or_else(|| NexusError::UnresolvableUri {
                uri: dest_uri.to_owned(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
            })?;

        let bytes = packet.encode();
        self.inner
            .socket
            .send_to(&bytes, addr)
            .map(|_| ())
            .map_err(|source| NexusError::Send {
                addr: addr.to_string(),
                source,
            })
    }
}

impl Drop for NexusInner {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.lock().expect("thread handle mutex poisoned").take() {
            // The worker wakes at most every `POLL_INTERVAL` to check the
            // shutdown flag, so this join cannot hang.
            if thread.join().is_err() {
                tracing::error!("nexus background thread panicked");
            }
        }
    }
}

fn background_loop(inner: &Arc<NexusInner>) {
    let mut buf = [0u8; RECV_BUF_LEN];
    while !inner.shutdown.load(Ordering::SeqCst) {
        let (len, _src) = match inner.socket.recv_from(&mut buf) {
            Ok(result) => result,
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(err) => {
                tracing::warn!(error = %err, "nexus socket recv failed");
                continue;
            }
        };

        let packet = match ManagementPacket::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed management packet");
                continue;
            }
        };

        let mut registry = inner.registry.lock().expect("registry mutex poisoned");
        match registry.endpoints.get_mut(&packet.dest_endpoint_id) {
            Some(producer) => {
                producer.try_push(packet).ok();
            }
            None => {
                tracing::warn!(
                    dest_endpoint_id = packet.dest_endpoint_id,
                    "dropping management packet for unknown endpoint"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dest_endpoint_id: u8) -> ManagementPacket {
        ManagementPacket {
            kind: PacketKind::ConnectReq,
            source_uri: "127.0.0.1:0".to_owned(),
            source_endpoint_id: 1,
            source_session_num: 0,
            dest_endpoint_id,
            dest_session_num: 0,
            nic_addr: vec![],
        }
    }

    #[test]
    fn registered_endpoint_receives_routed_packet() {
        let nexus = Nexus::new_standalone(0).expect("bind");
        let mut inbox = nexus.register(5, 8).expect("register");

        let addr = nexus.local_addr();
        nexus
            .send(&addr.to_string(), &sample(5))
            .expect("send to self");

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut received = None;
        while std::time::Instant::now() < deadline {
            if let Some(pkt) = inbox.try_pop() {
                received = Some(pkt);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(received.expect("packet should arrive").dest_endpoint_id, 5);
    }

    #[test]
    fn packet_for_unknown_endpoint_is_dropped_not_fatal() {
        let nexus = Nexus::new_standalone(0).expect("bind");
        let addr = nexus.local_addr();
        // No endpoint registered at all; this must not panic the worker.
        nexus
            .send(&addr.to_string(), &sample(99))
            .expect("send to self");
        std::thread::sleep(Duration::from_millis(50));
    }

    #[test]
    fn registering_the_same_id_twice_fails() {
        let nexus = Nexus::new_standalone(0).expect("bind");
        let _inbox = nexus.register(1, 4).expect("first register");
        let err = nexus.register(1, 4).unwrap_err();
        assert!(matches!(err, NexusError::AlreadyRegistered { id: 1 }));
    }

    #[test]
    fn deregister_then_register_again_succeeds() {
        let nexus = Nexus::new_standalone(0).expect("bind");
        let inbox = nexus.register(2, 4).expect("first register");
        drop(inbox);
        nexus.deregister(2);
        nexus.register(2, 4).expect("re-register after deregister");
    }
}
