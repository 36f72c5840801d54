//! Minimal two-endpoint echo demo: a client enqueues a small and then a
//! large request, a server handler reverses the payload bytes and replies,
//! and the client prints the observed round-trip latency for each.
//!
//! Stands in for `spec.md` §8's "Single echo" and "Large message" scenarios
//! run by hand instead of under a test harness, the same role the teacher's
//! `examples/echo.rs` plays for `aeronet_channel`.

use std::{
    cell::RefCell,
    rc::Rc,
    time::{Duration, Instant},
};

use clap::Parser;
use erpc::{Completion, Config, EndpointId, Nexus, RequestHandle, RpcEndpoint};
use erpc_io::loopback;
use tracing::info;

const ECHO_REQ_TYPE: u8 = 1;

/// Run the erpc echo demo over an in-process loopback transport.
#[derive(Parser)]
struct Args {
    /// Size in bytes of the large-message round trip.
    #[arg(long, default_value_t = 64 * 1024)]
    large_bytes: usize,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let nexus = Nexus::new_standalone(0).expect("bind nexus socket");
    let uri = nexus.local_addr().to_string();

    const SERVER_ID: EndpointId = 1;
    const CLIENT_ID: EndpointId = 2;

    let (client_transport, server_transport) = loopback::pair();

    // `Config::default()` sizes its arena for the common small-request case;
    // the large round trip below needs a size class that actually fits
    // `args.large_bytes`, so bump it the way any caller sending bigger
    // messages than the default must (`erpc::Config`'s own docs: "override
    // whatever the target NIC/workload needs").
    let config = Config {
        max_msg_bytes: args.large_bytes.max(Config::default().max_msg_bytes),
        ..Config::default()
    };

    let mut server = RpcEndpoint::new(
        nexus.clone(),
        SERVER_ID,
        uri.clone(),
        config.clone(),
        Box::new(server_transport),
        Box::new(|event| info!(?event, "server sm event")),
    )
    .expect("create server endpoint");

    server.register_request_handler(
        ECHO_REQ_TYPE,
        Box::new(|endpoint, handle: RequestHandle, req_buf| {
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
        }),
    );

    let mut client = RpcEndpoint::new(
        nexus,
        CLIENT_ID,
        uri.clone(),
        config,
        Box::new(client_transport),
        Box::new(|event| info!(?event, "client sm event")),
    )
    .expect("create client endpoint");

    let session_num = client.create_session(uri, SERVER_ID).expect("create_session");
    run_until_connected(&mut client, &mut server);

    run_round_trip(&mut client, &mut server, session_num, b"hello, erpc".to_vec());
    run_round_trip(&mut client, &mut server, session_num, vec![0xAB; args.large_bytes]);
}

fn run_until_connected(client: &mut RpcEndpoint, server: &mut RpcEndpoint) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        client.run_event_loop(1_000);
        server.run_event_loop(1_000);
        if client.stats().sessions_connected > 0 {
            break;
        }
        assert!(Instant::now() < deadline, "session setup did not complete in time");
    }
}

fn run_round_trip(client: &mut RpcEndpoint, server: &mut RpcEndpoint, session_num: u16, payload: Vec<u8>) {
    let mut req_buf = client.alloc_msg_buffer(payload.len()).expect("alloc request buffer");
    req_buf.write_area()[..payload.len()].copy_from_slice(&payload);
    req_buf.set_len(payload.len());

    let resp_buf = client.alloc_msg_buffer(payload.len()).expect("alloc response buffer");

    let started = Instant::now();
    let outcome: Rc<RefCell<Option<Completion>>> = Rc::new(RefCell::new(None));
    let outcome_cont = Rc::clone(&outcome);

    client
        .enqueue_request(
            session_num,
            ECHO_REQ_TYPE,
            req_buf,
            resp_buf,
            0,
            Box::new(move |completion: Completion| {
                *outcome_cont.borrow_mut() = Some(completion);
            }),
        )
        .unwrap_or_else(|err| panic!("enqueue_request: {:?}", err.error));

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        server.run_event_loop(100);
        client.run_event_loop(100);
        if outcome.borrow().is_some() {
            break;
        }
        assert!(Instant::now() < deadline, "round trip did not complete in time");
    }

    let completion = outcome.borrow_mut().take().expect("completion set");
    completion.result.expect("echo request succeeded");
    let mut expected = completion.req_buf.payload().to_vec();
    expected.reverse();
    assert_eq!(completion.resp_buf.payload(), expected.as_slice());
    info!(bytes = payload.len(), elapsed = ?started.elapsed(), "round trip complete");

    client.free_msg_buffer(completion.req_buf).expect("free request buffer");
    client.free_msg_buffer(completion.resp_buf).expect("free response buffer");
}
