//! Property tests for the frame codec

use dsx_market_data::protocol::frame::{self, HEADER_LEN};
use proptest::prelude::*;
use serde_json::{Map, Value};

// Integers only: float text round trips are not exact without serde_json's
// float_roundtrip feature
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        any::<u64>().prop_map(Value::from),
        "\\PC{0,24}".prop_map(Value::String),
    ];

    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,10}", inner, 0..8)
                .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn arb_envelope() -> impl Strategy<Value = Value> {
    ("[a-z_]{1,12}", arb_json()).prop_map(|(action, data)| {
        serde_json::json!({"act": action, "success": true, "data": data})
    })
}

/// Cut `bytes` into consecutive chunks whose sizes cycle through `sizes`
fn fragments<'a>(bytes: &'a [u8], sizes: &[usize]) -> Vec<&'a [u8]> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    for size in sizes.iter().cycle() {
        if offset >= bytes.len() {
            break;
        }
        let end = (offset + size).min(bytes.len());
        chunks.push(&bytes[offset..end]);
        offset = end;
    }
    chunks
}

proptest! {
    #[test]
    fn decode_inverts_encode(payload in arb_json(), compress in any::<bool>()) {
        let frame = frame::encode(&payload, compress).unwrap();
        prop_assert_eq!(frame::decode(&frame).unwrap(), payload);
    }

    #[test]
    fn header_length_matches_body(payload in arb_json(), compress in any::<bool>()) {
        let frame = frame::encode(&payload, compress).unwrap();
        let header = frame::FrameHeader::decode(&frame).unwrap();
        prop_assert_eq!(header.compressed, compress);
        prop_assert_eq!(header.body_len, frame.len() - HEADER_LEN);
    }

    #[test]
    fn fragmented_frame_reassembled(
        envelope in arb_envelope(),
        compress in any::<bool>(),
        sizes in prop::collection::vec(1usize..48, 1..16),
    ) {
        let frame = frame::encode(&envelope, compress).unwrap();

        let mut builder = tokio_test::io::Builder::new();
        for chunk in fragments(&frame, &sizes) {
            builder.read(chunk);
        }
        let mut stream = builder.build();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (header, decoded) = runtime.block_on(frame::read_frame(&mut stream)).unwrap();

        prop_assert_eq!(header.body_len, frame.len() - HEADER_LEN);
        prop_assert_eq!(decoded, envelope);
    }
}
