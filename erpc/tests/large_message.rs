//! Large message: a multi-fragment request round-trips through reassembly
//! on both ends (`spec.md` §8's "Large message" scenario). The payload is
//! large relative to the configured MTU so it is split across many packets,
//! but kept well under a megabyte to keep the test's arena and runtime
//! small — `frag::split`/`FragmentReceiver` do not care about absolute
//! size, only packet count, so this exercises the same reassembly path a
//! full megabyte would.

mod common;

use std::{cell::RefCell, rc::Rc, time::Duration};

use erpc::{Completion, Config};

#[test]
fn large_request_round_trips_through_reassembly() {
    let config = Config {
        mtu: 256,
        max_msg_bytes: 32 * 1024,
        buffers_per_class: 8,
        ..common::test_config()
    };
    let (mut client, mut server, session_num) = common::connected_pair(config, common::echo_handler());

    // 20000 bytes at a 192-byte max fragment length (256 MTU - 64-byte
    // header) works out to just over 100 fragments each way.
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

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
        .unwrap_or_else(|err| panic!("enqueue_request: {:?}", err.error));

    common::drive_until(&mut client, &mut server, Duration::from_secs(10), |_, _| outcome.borrow().is_some());

    let completion = outcome.borrow_mut().take().expect("completion set");
    completion.result.expect("request succeeded");
    let mut expected = payload.clone();
    expected.reverse();
    assert_eq!(completion.resp_buf.payload(), expected.as_slice());

    client.free_msg_buffer(completion.req_buf).expect("free request buffer");
    client.free_msg_buffer(completion.resp_buf).expect("free response buffer");
}
