//! An `mtu` too small to leave room for the per-packet header and the
//! fragment length prefix must be rejected at construction time, not panic
//! the first time a caller enqueues a message that needs fragmenting.

mod common;

use erpc::{Config, Error, Nexus, RpcEndpoint};
use erpc_io::loopback;

#[test]
fn mtu_too_small_for_header_and_prefix_is_rejected() {
    let nexus = Nexus::new_standalone(0).expect("bind nexus socket");
    let uri = nexus.local_addr().to_string();
    let (transport, _peer) = loopback::pair();

    let config = Config { mtu: 32, ..common::test_config() };
    let err = RpcEndpoint::new(nexus, common::SERVER_ID, uri, config, Box::new(transport), common::noop_sm_handler())
        .expect_err("mtu of 32 leaves no room for a 64-byte header plus a 4-byte length prefix");
    assert!(matches!(err, Error::InvalidConfig { .. }), "unexpected error: {err}");
}
