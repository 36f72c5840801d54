//! Per-thread RPC endpoint: session state machine, packet segmentation, and
//! the polling event loop that ties `erpc_alloc`, `erpc_io`,
//! `erpc_transport`, and `erpc_nexus` together into the user-facing API
//! `spec.md` §4.5 describes.
//!
//! An [`RpcEndpoint`] is created on one thread and never touched from
//! another afterwards: every piece of mutable state it owns — sessions,
//! slots, the arena, the transport — is reachable only through `&mut self`
//! methods, so the single-threaded invariant is enforced by the borrow
//! checker rather than a runtime assertion.
//!
//! ```no_run
//! use erpc::{Config, RpcEndpoint};
//! use erpc_nexus::Nexus;
//!
//! let nexus = Nexus::handle(31_850)?;
//! let (transport, _peer) = erpc_io::loopback::pair();
//! let transport: Box<dyn erpc_io::Transport> = Box::new(transport);
//! let mut endpoint = RpcEndpoint::new(
//!     nexus,
//!     1,
//!     "erpc://localhost:31850",
//!     Config::default(),
//!     transport,
//!     Box::new(|_event| {}),
//! )?;
//! endpoint.run_event_loop(0);
//! # Ok::<(), erpc::Error>(())
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod numa;
pub mod session;
pub mod stats;

pub use {
    config::Config,
    endpoint::{
        EnqueueRequestError, EnqueueResponseError, Handler, RpcEndpoint, SmEvent, SmHandler,
    },
    error::Error,
    session::{Completion, Continuation, RequestHandle, SessionState},
    stats::EndpointStats,
};

pub use erpc_alloc::MsgBuffer;
pub use erpc_nexus::{EndpointId, Nexus};
