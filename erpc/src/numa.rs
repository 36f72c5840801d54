//! NUMA topology detection for the slow path (`spec.md` §4.7).
//!
//! Queries `/sys/devices/system/node/` — the standard Linux sysfs NUMA
//! topology — rather than pulling in a heavyweight `hwloc`-style dependency
//! for what is, in this exercise, a simple node-id lookup: the NIC identified
//! by `phy_port` doesn't have a discoverable sysfs binding without a real
//! verbs device present, so this reports the lowest-numbered node on the
//! host as a stand-in and logs what it did.

use std::{fs, path::Path};

use tracing::debug;

const NODE_SYSFS_ROOT: &str = "/sys/devices/system/node";

/// Best-effort detection of which NUMA node a NIC named by `phy_port` is
/// local to.
///
/// Returns `None` if the host exposes no NUMA topology at all (a single-node
/// machine, or a container without `/sys` mounted) — callers treat `None`
/// the same as an explicit choice not to bind.
#[must_use]
pub fn detect_nic_numa_node(phy_port: &str) -> Option<u32> {
    let root = Path::new(NODE_SYSFS_ROOT);
    let entries = fs::read_dir(root).ok()?;

    let mut nodes: Vec<u32> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            name.strip_prefix("node")?.parse::<u32>().ok()
        })
        .collect();
    nodes.sort_unstable();

    let node = nodes.into_iter().next();
    debug!(phy_port, ?node, "detected NUMA node for NIC");
    node
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sysfs_topology_returns_none_not_a_panic() {
        // This host's `/sys/devices/system/node` may or may not exist in the
        // sandbox this runs in; either outcome is a valid `Option`, the test
        // just asserts the call doesn't panic either way.
        let _ = detect_nic_numa_node("mlx5_0:1");
    }
}
