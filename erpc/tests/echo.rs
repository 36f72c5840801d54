//! Single echo: a small request round-trips through a connected session and
//! comes back reversed (`spec.md` §8's "Single echo" scenario).

mod common;

use std::{
    cell::RefCell,
    rc::Rc,
    time::Duration,
};

use erpc::Completion;

#[test]
fn small_request_round_trips() {
    let (mut client, mut server, session_num) = common::connected_pair(common::test_config(), common::echo_handler());

    let payload = b"hello, erpc".to_vec();
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

    common::drive_until(&mut client, &mut server, Duration::from_secs(5), |_, _| outcome.borrow().is_some());

    let completion = outcome.borrow_mut().take().expect("completion set");
    completion.result.expect("request succeeded");
    let mut expected = payload.clone();
    expected.reverse();
    assert_eq!(completion.resp_buf.payload(), expected.as_slice());

    client.free_msg_buffer(completion.req_buf).expect("free request buffer");
    client.free_msg_buffer(completion.resp_buf).expect("free response buffer");
}
