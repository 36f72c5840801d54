#![no_main]

use {arbitrary::Arbitrary, erpc_transport::seq_buf::SeqBuf, libfuzzer_sys::fuzz_target};

#[derive(Debug, Arbitrary)]
enum OpKind {
    Insert,
    Remove,
}

#[derive(Debug, Arbitrary)]
struct Op {
    kind: OpKind,
    key: u32,
    value: u32,
}

fuzz_target!(|input: Box<[Op]>| {
    let mut buf = SeqBuf::<u32>::new(16, 0);

    for op in input {
        match op.kind {
            OpKind::Insert => {
                buf.insert(op.key, op.value);
                let value = buf.get(op.key).expect("just inserted");
                assert_eq!(op.value, *value);
            }
            OpKind::Remove => {
                buf.remove(op.key, 0);
            }
        }
    }
});
