//! A two-node replicated counter: a primary node enqueues `Replicate`
//! requests against a backup node's counter and only considers an
//! increment durable once the backup's response lands.
//!
//! This is the scale-appropriate stand-in for "the bundled consensus demo"
//! `spec.md` §1/§9 names as an external collaborator evidencing the public
//! contract (request-handler registration, per-session request enqueueing,
//! a session-management callback) — it is explicitly an application built
//! on the core API, not a consensus algorithm, and it keeps no state beyond
//! the process (`spec.md` §1 non-goal (a); the `kUsePmem` log-callback path
//! `spec.md` §9 calls out is intentionally not reproduced here).

use std::{
    cell::Cell,
    rc::Rc,
    time::{Duration, Instant},
};

use erpc::{Completion, Config, EndpointId, Error, Nexus, RequestHandle, RpcEndpoint, SmEvent};
use erpc_io::loopback;
use tracing::info;

const REPLICATE_REQ_TYPE: u8 = 1;
const INCREMENTS: u64 = 10;

fn main() {
    tracing_subscriber::fmt::init();

    let nexus = Nexus::new_standalone(0).expect("bind nexus socket");
    let uri = nexus.local_addr().to_string();

    const PRIMARY_ID: EndpointId = 1;
    const BACKUP_ID: EndpointId = 2;

    let (primary_transport, backup_transport) = loopback::pair();

    let backup_connected = Rc::new(Cell::new(false));
    let backup_connected_sm = Rc::clone(&backup_connected);
    let mut backup = RpcEndpoint::new(
        nexus.clone(),
        BACKUP_ID,
        uri.clone(),
        Config::default(),
        Box::new(backup_transport),
        Box::new(move |event| {
            info!(?event, "backup sm event");
            match event {
                SmEvent::Connected { .. } => backup_connected_sm.set(true),
                SmEvent::Disconnected { .. } | SmEvent::ConnectFailed { .. } => {
                    backup_connected_sm.set(false);
                }
            }
        }),
    )
    .expect("create backup endpoint");

    let backup_counter = Rc::new(Cell::new(0u64));
    let backup_counter_handler = Rc::clone(&backup_counter);
    backup.register_request_handler(
        REPLICATE_REQ_TYPE,
        Box::new(move |endpoint, handle: RequestHandle, req_buf| {
            let delta = u64::from_be_bytes(req_buf.payload().try_into().expect("8-byte delta"));
            let total = backup_counter_handler.get() + delta;
            backup_counter_handler.set(total);
            endpoint.free_msg_buffer(req_buf).expect("free request buffer");

            let mut resp_buf = endpoint.alloc_msg_buffer(8).expect("alloc response buffer");
            resp_buf.write_area()[..8].copy_from_slice(&total.to_be_bytes());
            resp_buf.set_len(8);
            endpoint
                .enqueue_response(handle, resp_buf)
                .unwrap_or_else(|err| panic!("enqueue_response: {:?}", err.error));
        }),
    );

    let primary_connected = Rc::new(Cell::new(false));
    let primary_connected_sm = Rc::clone(&primary_connected);
    let mut primary = RpcEndpoint::new(
        nexus,
        PRIMARY_ID,
        uri.clone(),
        Config::default(),
        Box::new(primary_transport),
        Box::new(move |event| {
            info!(?event, "primary sm event");
            match event {
                SmEvent::Connected { .. } => primary_connected_sm.set(true),
                SmEvent::Disconnected { .. } | SmEvent::ConnectFailed { .. } => {
                    primary_connected_sm.set(false);
                }
            }
        }),
    )
    .expect("create primary endpoint");

    let session_num = primary.create_session(uri, BACKUP_ID).expect("create_session");
    let deadline = Instant::now() + Duration::from_secs(2);
    while !(primary_connected.get() && backup_connected.get()) {
        primary.run_event_loop(1_000);
        backup.run_event_loop(1_000);
        assert!(Instant::now() < deadline, "session setup did not complete in time");
    }

    let mut durable_count = 0u64;
    for i in 1..=INCREMENTS {
        durable_count = replicate_increment(&mut primary, &mut backup, session_num, 1);
        info!(increment = i, durable_count, "replicated increment committed");
    }
    assert_eq!(durable_count, INCREMENTS);
    assert_eq!(backup_counter.get(), INCREMENTS);

    primary.destroy_session(session_num).expect("destroy_session");
    let deadline = Instant::now() + Duration::from_secs(2);
    while primary_connected.get() {
        primary.run_event_loop(1_000);
        backup.run_event_loop(1_000);
        assert!(Instant::now() < deadline, "session teardown did not complete in time");
    }
}

/// Replicates one increment of `delta` to the backup and returns the
/// backup-confirmed running total once its response lands.
fn replicate_increment(
    primary: &mut RpcEndpoint,
    backup: &mut RpcEndpoint,
    session_num: u16,
    delta: u64,
) -> u64 {
    let mut req_buf = primary.alloc_msg_buffer(8).expect("alloc request buffer");
    req_buf.write_area()[..8].copy_from_slice(&delta.to_be_bytes());
    req_buf.set_len(8);
    let resp_buf = primary.alloc_msg_buffer(8).expect("alloc response buffer");

    let outcome: Rc<std::cell::RefCell<Option<Completion>>> = Rc::new(std::cell::RefCell::new(None));
    let outcome_cont = Rc::clone(&outcome);
    primary
        .enqueue_request(
            session_num,
            REPLICATE_REQ_TYPE,
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
        backup.run_event_loop(100);
        primary.run_event_loop(100);
        if outcome.borrow().is_some() {
            break;
        }
        assert!(Instant::now() < deadline, "replication round trip did not complete in time");
    }

    let completion = outcome.borrow_mut().take().expect("completion set");
    let total = match completion.result {
        Ok(()) => u64::from_be_bytes(completion.resp_buf.payload().try_into().expect("8-byte total")),
        Err(Error::SessionReset { .. }) => panic!("backup session reset mid-replication"),
        Err(err) => panic!("replicate request failed: {err}"),
    };
    primary.free_msg_buffer(completion.req_buf).expect("free request buffer");
    primary.free_msg_buffer(completion.resp_buf).expect("free response buffer");
    total
}
