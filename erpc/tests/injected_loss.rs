//! Injected loss: with both directions of the loopback transport dropping
//! roughly one packet in ten, every request must still eventually complete
//! via PTO-driven retransmission (`spec.md` §8's "Injected loss" scenario).
//! 30 large-ish requests is scaled down from the megabyte-sized,
//! thousand-request scenario the scenario describes to keep the test fast;
//! the retransmission path being exercised does not care about the
//! absolute count or size, only that some packets are lost and recovered.

mod common;

use std::{cell::RefCell, rc::Rc, time::Duration};

use erpc::{Completion, Config, Nexus, RpcEndpoint};
use erpc_io::loopback;

#[test]
fn requests_complete_despite_dropped_packets() {
    let config = Config { mtu: 256, max_msg_bytes: 8 * 1024, buffers_per_class: 16, ..common::test_config() };

    let nexus = Nexus::new_standalone(0).expect("bind nexus socket");
    let uri = nexus.local_addr().to_string();

    let (mut client_transport, mut server_transport) = loopback::pair();
    client_transport.set_drop_every(10);
    server_transport.set_drop_every(10);

    let mut server = RpcEndpoint::new(
        nexus.clone(),
        common::SERVER_ID,
        uri.clone(),
        config.clone(),
        Box::new(server_transport),
        common::noop_sm_handler(),
    )
    .expect("create server endpoint");
    server.register_request_handler(common::ECHO_REQ_TYPE, common::echo_handler());

    let mut client = RpcEndpoint::new(
        nexus,
        common::CLIENT_ID,
        uri.clone(),
        config,
        Box::new(client_transport),
        common::noop_sm_handler(),
    )
    .expect("create client endpoint");

    let session_num = client.create_session(uri, common::SERVER_ID).expect("create_session");
    common::drive_until(&mut client, &mut server, Duration::from_secs(10), |client, _| {
        client.stats().sessions_connected > 0
    });

    const REQUESTS: usize = 30;
    let payload: Vec<u8> = (0..2_000u32).map(|i| (i % 251) as u8).collect();

    for i in 0..REQUESTS {
        let mut req_buf = client.alloc_msg_buffer(payload.len()).expect("alloc request buffer");
        req_buf.write_area()[..payload.len()].copy_from_slice(&payload);
        req_buf.set_len(payload.len());
        let resp_buf = client.alloc_msg_buffer(payload.len()).expect("alloc response buffer");

        let outcome: Rc<RefCell<Option<Completion>>> = Rc::new(RefCell::new(None));
        let outcome_cont = Rc::clone(&outcome);
        client
            .enqueue_request(
                session_num,
                common::ECHO_REQ_TYPE,
                req_buf,
                resp_buf,
                0,
                Box::new(move |completion| *outcome_cont.borrow_mut() = Some(completion)),
            )
            .unwrap_or_else(|err| panic!("enqueue_request {i}: {:?}", err.error));

        common::drive_until(&mut client, &mut server, Duration::from_secs(10), |_, _| outcome.borrow().is_some());

        let completion = outcome.borrow_mut().take().expect("completion set");
        completion.result.unwrap_or_else(|err| panic!("request {i} failed: {err}"));
        let mut expected = payload.clone();
        expected.reverse();
        assert_eq!(completion.resp_buf.payload(), expected.as_slice(), "request {i} mismatch");

        client.free_msg_buffer(completion.req_buf).expect("free request buffer");
        client.free_msg_buffer(completion.resp_buf).expect("free response buffer");
    }
}
