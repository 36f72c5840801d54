//! Peer unreachable: `create_session` against a URI nothing is listening on
//! must deliver `SetupTimeout` within the configured budget and release the
//! reserved session number back to the free list (`spec.md` §8's "Peer
//! unreachable" scenario).

mod common;

use std::{
    cell::RefCell,
    rc::Rc,
    time::{Duration, Instant},
};

use erpc::{Config, Error, Nexus, RpcEndpoint, SmEvent};
use erpc_io::loopback;

#[test]
fn unreachable_peer_times_out_and_frees_the_session_number() {
    let config = Config { setup_timeout_us: 50_000, ..common::test_config() };

    let nexus = Nexus::new_standalone(0).expect("bind nexus socket");
    let (client_transport, _unused_peer) = loopback::pair();

    let events: Rc<RefCell<Vec<SmEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let events_sm = Rc::clone(&events);
    let mut client = RpcEndpoint::new(
        nexus,
        common::CLIENT_ID,
        "erpc://127.0.0.1:0",
        config,
        Box::new(client_transport),
        Box::new(move |event| events_sm.borrow_mut().push(event)),
    )
    .expect("create client endpoint");

    // Nothing is bound to this UDP port; the out-of-band ConnectReq is sent
    // but never answered, so setup must fail on the local timeout alone.
    let session_num = client
        .create_session("127.0.0.1:1", common::SERVER_ID)
        .expect("create_session");

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        client.run_event_loop(10_000);
        if !events.borrow().is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "ConnectFailed was not delivered within the setup budget");
    }

    let fired = events.borrow_mut().remove(0);
    match fired {
        SmEvent::ConnectFailed { session_num: failed_num, error: Error::SetupTimeout { .. } } => {
            assert_eq!(failed_num, session_num);
        }
        other => panic!("expected ConnectFailed/SetupTimeout, got {other:?}"),
    }

    // The session number must be back in the free list: requesting a fresh
    // session must not fail with `NoFreeSession`, and (the free list being
    // a LIFO stack with nothing else ever pushed to it in this test) must
    // hand back the exact number the failed attempt released.
    let next_session_num = client
        .create_session("127.0.0.1:1", common::SERVER_ID)
        .expect("create_session after the first one timed out");
    assert_eq!(next_session_num, session_num);
}
