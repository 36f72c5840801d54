//! Session churn: many sessions created and torn down in sequence on one
//! endpoint must not leak session numbers (`spec.md` §8's "Session churn"
//! scenario). 300 churns is more than the 256-entry session-number pool a
//! single `RpcEndpoint` preallocates, so a leaking `free_session_nums`
//! would surface as `NoFreeSession` well before this test finishes.

mod common;

use std::time::Duration;

#[test]
fn repeated_churn_does_not_leak_session_numbers() {
    let (mut client, mut server, uri) = common::new_pair(common::test_config(), common::echo_handler());

    const CHURNS: u32 = 300;
    for i in 0..CHURNS {
        let session_num = client
            .create_session(uri.clone(), common::SERVER_ID)
            .unwrap_or_else(|err| panic!("create_session churn {i}: {err}"));
        common::drive_until(&mut client, &mut server, Duration::from_secs(5), |client, _| {
            client.stats().sessions_connected == u64::from(i) + 1
        });

        client
            .destroy_session(session_num)
            .unwrap_or_else(|err| panic!("destroy_session churn {i}: {err}"));
        common::drive_until(&mut client, &mut server, Duration::from_secs(5), |client, _| {
            client.stats().sessions_disconnected == u64::from(i) + 1
        });
    }

    assert_eq!(client.stats().sessions_connected, u64::from(CHURNS));
    assert_eq!(client.stats().sessions_disconnected, u64::from(CHURNS));
}
