//! See [`Config`].

/// Construction-time options for an [`crate::RpcEndpoint`].
///
/// Defaults are chosen for a datacenter RoCE fabric (`spec.md` §6), not for
/// any particular deployment — override whatever the target NIC/workload
/// needs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Which local NIC port to bind the transport to. Passed to
    /// [`erpc_io::verbs::VerbsTransport::open`] when the `verbs` feature is
    /// enabled; ignored by [`erpc_io::LoopbackTransport`].
    pub phy_port: String,
    /// NUMA node to bind the huge-page arena to. `None` runs
    /// [`crate::numa::detect_nic_numa_node`] at endpoint construction time
    /// instead of trusting a hardcoded value.
    pub numa_node: Option<u32>,
    /// UDP port the process-wide [`erpc_nexus::Nexus`] binds for session
    /// setup/teardown. Only the first [`crate::RpcEndpoint`] created in a
    /// process actually binds this port; later endpoints share that
    /// singleton (`spec.md` §4.6, §9).
    pub sm_udp_port: u16,
    /// Credit window per session: the number of concurrently outstanding
    /// requests a session permits (`spec.md` §4.4).
    pub session_slots: usize,
    /// Receive queue depth the transport is kept replenished to.
    pub rx_ring_size: usize,
    /// Transport MTU in bytes, including the packet header.
    pub mtu: usize,
    /// Largest single-packet (jumbo) payload the arena must back a buffer
    /// for; forwarded to [`erpc_alloc::HugeAllocatorConfig::max_class_bytes`].
    pub max_msg_bytes: usize,
    /// How many buffers the arena reserves per size class.
    pub buffers_per_class: usize,
    /// Budget given to [`crate::Nexus`]-backed session setup before a
    /// pending `create_session` call is failed with
    /// [`crate::Error::SetupTimeout`].
    pub setup_timeout_us: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            phy_port: "mlx5_0:1".to_owned(),
            numa_node: None,
            sm_udp_port: 31_850,
            session_slots: 8,
            rx_ring_size: 2 * 1024,
            mtu: 1024,
            max_msg_bytes: 8192,
            buffers_per_class: 4 * 1024,
            setup_timeout_us: 200_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn default_matches_spec_session_slots() {
        assert_eq!(Config::default().session_slots, 8);
    }
}
