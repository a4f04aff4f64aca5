#![no_main]

use libfuzzer_sys::fuzz_target;
use witness_protocol::{codec, Message};
use witness_types::Timestamp;

// Inbound frames are decoded into a Message before anything else; a decoded
// message must survive re-encoding unchanged.
fuzz_target!(|data: &[u8]| {
    let Ok(message) = codec::decode::<Message>(data) else {
        return;
    };
    let _ = message.is_deliverable(Timestamp::from_millis(0));
    let _ = message.message_type();

    let encoded = codec::encode(&message).expect("decoded message must re-encode");
    let again: Message = codec::decode(&encoded).expect("re-encoded message must decode");
    assert_eq!(again, message);
});
