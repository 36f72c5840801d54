//! Verbs-backed [`Transport`] for real kernel-bypass NICs.
//!
//! Gated behind the `verbs` feature. Per `spec.md` Non-goal (d), if no
//! suitable NIC is present the system does not run: [`VerbsTransport::open`]
//! probes for an ibverbs-capable device and returns [`IoError::NoDevice`]
//! rather than falling back to anything resembling a software NIC.
//!
//! The queue pair / completion queue / memory region vocabulary below
//! follows the standard verbs API (`ibv_qp`, `ibv_cq`, `ibv_mr`, work
//! completions) so it reads the same as any other verbs binding, without
//! pulling in an actual `ibverbs`/`rdma-core` crate dependency.

use std::path::Path;

use crate::{CompletionEvent, IoError, Mr, OutgoingPacket, RecvSlot, Transport};

/// Path probed to determine whether an ibverbs-capable device is registered
/// with the kernel. A real implementation would open this device and create
/// a protection domain, queue pair, and completion queue through `ibv_*`
/// calls; this exercise stops at detection.
const INFINIBAND_CLASS_PATH: &str = "/sys/class/infiniband";

/// A transport backed by a real RDMA/RoCE NIC via the verbs API.
///
/// Only [`VerbsTransport::open`] is implemented in this exercise: it
/// performs the device presence check that every real deployment needs
/// before doing anything else, and returns [`IoError::NoDevice`] when there
/// is nothing to bind to. A complete implementation would go on to create a
/// protection domain, one queue pair and completion queue per
/// [`RpcEndpoint`](../../erpc/struct.RpcEndpoint.html), and implement
/// [`Transport`] in terms of `ibv_post_send`/`ibv_post_recv`/`ibv_poll_cq`.
pub struct VerbsTransport {
    device_name: String,
}

impl VerbsTransport {
    /// Opens the verbs device named `phy_port` (see `spec.md` §6
    /// Configuration).
    ///
    /// # Errors
    ///
    /// Returns [`IoError::NoDevice`] if `/sys/class/infiniband` does not
    /// exist or has no entries, i.e. no ibverbs-capable NIC is registered
    /// with the kernel.
    pub fn open(phy_port: &str) -> Result<Self, IoError> {
        let present = Path::new(INFINIBAND_CLASS_PATH)
            .read_dir()
            .is_ok_and(|mut entries| entries.next().is_some());
        if !present {
            return Err(IoError::NoDevice);
        }
        Ok(Self {
            device_name: phy_port.to_owned(),
        })
    }
}

impl Transport for VerbsTransport {
    unsafe fn register_region(&mut self, _base: *mut u8, _len: usize) -> Result<Mr, IoError> {
        Err(IoError::RegistrationFailed {
            reason: format!(
                "verbs registration not implemented for device {}",
                self.device_name
            ),
        })
    }

    fn deregister_region(&mut self, _mr: Mr) {}

    fn post_send(&mut self, _packets: &[OutgoingPacket<'_>]) {}

    fn post_recv(&mut self, _buffers: &mut [RecvSlot<'_>]) {}

    fn poll_completions(&mut self, _max: usize) -> Vec<CompletionEvent> {
        Vec::new()
    }

    fn tx_flush(&mut self) {}
}
