//! Shared setup for the integration tests in this directory: a standalone
//! [`Nexus`] plus a loopback-connected client/server pair, driven the same
//! way `demos/src/bin/echo.rs` drives one by hand.
#![allow(dead_code)]

use std::time::{Duration, Instant};

use erpc::{Config, EndpointId, Handler, Nexus, RpcEndpoint, SmEvent, SmHandler};
use erpc_io::LoopbackTransport;

pub const ECHO_REQ_TYPE: u8 = 1;

pub const SERVER_ID: EndpointId = 1;
pub const CLIENT_ID: EndpointId = 2;

/// A `Config` sized for fast test runs: small slot count, small arena,
/// small MTU so multi-packet fragmentation is exercised without needing
/// megabyte-sized buffers.
pub fn test_config() -> Config {
    Config {
        sm_udp_port: 0,
        session_slots: 8,
        rx_ring_size: 64,
        mtu: 256,
        max_msg_bytes: 8192,
        buffers_per_class: 16,
        setup_timeout_us: 300_000,
        ..Config::default()
    }
}

/// A request handler that reverses the request payload into the response,
/// the same behavior `demos/src/bin/echo.rs` registers.
pub fn echo_handler() -> Handler {
    Box::new(|endpoint, handle, req_buf| {
        let mut resp_buf = endpoint
            .alloc_msg_buffer(req_buf.len())
            .expect("alloc response buffer");
        resp_buf.write_area()[..req_buf.len()].copy_from_slice(req_buf.payload());
        resp_buf.write_area()[..req_buf.len()].reverse();
        resp_buf.set_len(req_buf.len());

        endpoint.free_msg_buffer(req_buf).expect("free request buffer");
        endpoint
            .enqueue_response(handle, resp_buf)
            .unwrap_or_else(|err| panic!("enqueue_response: {:?}", err.error));
    })
}

pub fn noop_sm_handler() -> SmHandler {
    Box::new(|_event: SmEvent| {})
}

/// Builds a standalone [`Nexus`], a loopback transport pair, and a
/// client/server endpoint pair bound to `config` with `server_handler`
/// registered under [`ECHO_REQ_TYPE`] on the server. Does not connect a
/// session.
pub fn new_pair(config: Config, server_handler: Handler) -> (RpcEndpoint, RpcEndpoint, String) {
    let nexus = Nexus::new_standalone(0).expect("bind nexus socket");
    let uri = nexus.local_addr().to_string();

    let (client_transport, server_transport): (LoopbackTransport, LoopbackTransport) = erpc_io::loopback::pair();

    let mut server = RpcEndpoint::new(
        nexus.clone(),
        SERVER_ID,
        uri.clone(),
        config.clone(),
        Box::new(server_transport),
        noop_sm_handler(),
    )
    .expect("create server endpoint");
    server.register_request_handler(ECHO_REQ_TYPE, server_handler);

    let client = RpcEndpoint::new(
        nexus,
        CLIENT_ID,
        uri.clone(),
        config,
        Box::new(client_transport),
        noop_sm_handler(),
    )
    .expect("create client endpoint");

    (client, server, uri)
}

/// Builds a connected client/server pair and returns the client-side
/// session number of the now-`Connected` session.
pub fn connected_pair(config: Config, server_handler: Handler) -> (RpcEndpoint, RpcEndpoint, u16) {
    let (mut client, mut server, uri) = new_pair(config, server_handler);
    let session_num = client.create_session(uri, SERVER_ID).expect("create_session");
    drive_until(&mut client, &mut server, Duration::from_secs(5), |client, _| {
        client.stats().sessions_connected > 0
    });
    (client, server, session_num)
}

/// Alternates `client.run_event_loop`/`server.run_event_loop` passes until
/// `done` returns `true` or `timeout` elapses (panicking in the latter
/// case).
pub fn drive_until(
    client: &mut RpcEndpoint,
    server: &mut RpcEndpoint,
    timeout: Duration,
    mut done: impl FnMut(&RpcEndpoint, &RpcEndpoint) -> bool,
) {
    let deadline = Instant::now() + timeout;
    loop {
        client.run_event_loop(200);
        server.run_event_loop(200);
        if done(client, server) {
            return;
        }
        assert!(Instant::now() < deadline, "condition did not become true in time");
    }
}
