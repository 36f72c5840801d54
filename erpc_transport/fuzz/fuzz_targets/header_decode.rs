#![no_main]

use {erpc_transport::packet::PacketHeader, libfuzzer_sys::fuzz_target};

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = PacketHeader::decode(data) {
        let mut buf = [0u8; PacketHeader::WIRE_LEN];
        header.encode(&mut buf);
        let reencoded = PacketHeader::decode(&buf).expect("we just encoded this");
        assert_eq!(header, reencoded);
    }
});
