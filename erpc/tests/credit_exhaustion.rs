//! Credit exhaustion: with an 8-slot session, the 9th concurrently
//! outstanding request must be rejected with `NoCredits`, and succeed once
//! an earlier request's completion frees a slot (`spec.md` §8's "Credit
//! exhaustion" scenario).

mod common;

use std::{cell::RefCell, rc::Rc, time::Duration};

use erpc::{Completion, Config, Error};

#[test]
fn ninth_request_rejected_until_a_slot_frees() {
    let config = Config { session_slots: 8, ..common::test_config() };
    let (mut client, mut server, session_num) = common::connected_pair(config, common::echo_handler());

    let mut outcomes = Vec::new();
    for _ in 0..8 {
        let mut req_buf = client.alloc_msg_buffer(8).expect("alloc request buffer");
        req_buf.write_area()[..8].copy_from_slice(&[0u8; 8]);
        req_buf.set_len(8);
        let resp_buf = client.alloc_msg_buffer(8).expect("alloc response buffer");

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
            .unwrap_or_else(|err| panic!("enqueue_request #{}: {:?}", outcomes.len(), err.error));
        outcomes.push(outcome);
    }

    for extra in 0..8 {
        let mut req_buf = client.alloc_msg_buffer(8).expect("alloc request buffer");
        req_buf.set_len(8);
        let resp_buf = client.alloc_msg_buffer(8).expect("alloc response buffer");
        let err = client
            .enqueue_request(session_num, common::ECHO_REQ_TYPE, req_buf, resp_buf, 0, Box::new(|_| {}))
            .expect_err("9th..16th request must be rejected while all 8 slots are in flight");
        assert!(
            matches!(err.error, Error::NoCredits { session_num: s, used: 8, cap: 8 } if s == session_num),
            "unexpected error for extra request {extra}: {:?}",
            err.error
        );
        client.free_msg_buffer(err.req_buf).expect("free rejected request buffer");
        client.free_msg_buffer(err.resp_buf).expect("free rejected response buffer");
    }

    common::drive_until(&mut client, &mut server, Duration::from_secs(5), |_, _| {
        outcomes.iter().all(|o| o.borrow().is_some())
    });
    for outcome in &outcomes {
        let completion = outcome.borrow_mut().take().expect("completion set");
        completion.result.expect("request succeeded");
        client.free_msg_buffer(completion.req_buf).expect("free request buffer");
        client.free_msg_buffer(completion.resp_buf).expect("free response buffer");
    }

    // All 8 credits are free again now; one more request must succeed.
    let mut req_buf = client.alloc_msg_buffer(8).expect("alloc request buffer");
    req_buf.set_len(8);
    let resp_buf = client.alloc_msg_buffer(8).expect("alloc response buffer");
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
        .expect("request succeeds once a slot has freed up");

    common::drive_until(&mut client, &mut server, Duration::from_secs(5), |_, _| outcome.borrow().is_some());
    let completion = outcome.borrow_mut().take().expect("completion set");
    completion.result.expect("request succeeded");
    client.free_msg_buffer(completion.req_buf).expect("free request buffer");
    client.free_msg_buffer(completion.resp_buf).expect("free response buffer");
}
