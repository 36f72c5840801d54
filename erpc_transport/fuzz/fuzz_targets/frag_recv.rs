#![no_main]

use {
    erpc_transport::{
        frag::{FragmentReceiver, TOTAL_LEN_PREFIX},
        packet::RequestNum,
    },
    libfuzzer_sys::fuzz_target,
};

fuzz_target!(|input: (u64, u16, u16, u16, &[u8])| {
    let (request_num, total_pkts, this_pkt, max_frag_len, payload) = input;
    // `reassemble` only promises sane behavior for the same `max_frag_len`
    // contract `split` enforces: room left for the length prefix.
    let max_frag_len = usize::from(max_frag_len).max(TOTAL_LEN_PREFIX + 1);

    let mut recv = FragmentReceiver::default();
    _ = recv.reassemble(RequestNum::new(request_num), total_pkts, this_pkt, payload, max_frag_len);
});
