//! See [`Error`].

/// Errors produced by the public [`crate::RpcEndpoint`] API.
///
/// Unifies every error kind `spec.md` §7 lists plus the lower-layer
/// [`erpc_alloc::AllocError`]/[`erpc_io::IoError`]/[`erpc_nexus::NexusError`]
/// via `#[from]`-style conversions, so callers match one type at the API
/// boundary while each crate still owns its own precisely-scoped enum
/// internally (the same layering `aeronet_io::connection::DisconnectReason`
/// uses over a boxed lower-layer error, implemented here with a typed enum
/// plus `derive_more::From` rather than an opaque box, since every error
/// kind crossing this boundary is known statically).
#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum Error {
    /// The arena could not satisfy an allocation.
    #[display("{_0}")]
    Alloc(erpc_alloc::AllocError),
    /// A transport-level operation failed.
    #[display("{_0}")]
    Io(erpc_io::IoError),
    /// The Nexus rejected a registration or send.
    #[display("{_0}")]
    Nexus(erpc_nexus::NexusError),
    /// The session number space is exhausted: every session number up to
    /// the configured maximum is in use.
    #[display("no free session number available")]
    NoFreeSession,
    /// A request was enqueued on a session not in `Connected`.
    #[display("session {session_num} is not connected")]
    SessionNotConnected {
        /// The session that was not connected.
        session_num: u16,
    },
    /// Every slot in the session is occupied by an in-flight request.
    #[display("no credits available on session {session_num}: {used}/{cap} slots in use")]
    NoCredits {
        /// The exhausted session.
        session_num: u16,
        /// Slots currently occupied.
        used: usize,
        /// Total configured credit window.
        cap: usize,
    },
    /// Delivered to a continuation when its session tore down while the
    /// request was still outstanding.
    #[display("session {session_num} reset with outstanding requests")]
    SessionReset {
        /// The session that was reset.
        session_num: u16,
    },
    /// Out-of-band session setup did not complete within
    /// [`crate::Config::setup_timeout_us`].
    #[display("session setup to {uri:?} timed out")]
    SetupTimeout {
        /// URI setup was attempted against.
        uri: String,
    },
    /// The transport reported an unrecoverable error; the endpoint and all
    /// of its sessions are now in a terminal state.
    #[display("fatal transport error: {reason}")]
    FatalTransport {
        /// Driver-reported reason.
        reason: String,
    },
    /// `session_num` does not name a session this endpoint owns.
    #[display("unknown session number {session_num}")]
    UnknownSession {
        /// The unrecognized session number.
        session_num: u16,
    },
    /// A response exceeded the capacity of the buffer the client reserved
    /// for it in `enqueue_request`.
    #[display("response of {actual} bytes exceeds the {reserved}-byte buffer reserved for it")]
    ResponseTooLarge {
        /// Bytes the response actually needed.
        actual: usize,
        /// Capacity of the buffer the caller supplied.
        reserved: usize,
    },
    /// `enqueue_response` was called with a [`crate::RequestHandle`] whose
    /// slot has since moved on to a different request — the original
    /// request is either already answered (a retransmitted duplicate was
    /// served from the cached response) or the session reset underneath it.
    #[display("request handle for session {session_num} is stale")]
    StaleRequestHandle {
        /// The session the handle named.
        session_num: u16,
    },
    /// [`crate::Config`] described a combination of settings `RpcEndpoint`
    /// cannot operate with.
    #[display("invalid configuration: {reason}")]
    InvalidConfig {
        /// What about the configuration is invalid.
        reason: String,
    },
}
