#![no_main]

use libfuzzer_sys::fuzz_target;
use witness_protocol::codec;

// Framing and the value codec must reject arbitrary bytes without panicking.
fuzz_target!(|data: &[u8]| {
    let _ = codec::decode::<String>(data);
    let _ = codec::decode::<Vec<u8>>(data);
    let _ = codec::decode_framed::<u64>(data);
    let _ = codec::decode_framed::<Vec<u8>>(data);

    if data.len() >= 8 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&data[..8]);
        let val = u64::from_le_bytes(word);
        if let Ok(framed) = codec::encode_frame(&val) {
            let (decoded, consumed) =
                codec::decode_framed::<u64>(&framed).expect("framed u64 must decode");
            assert_eq!(decoded, val);
            assert_eq!(consumed, framed.len());
        }
    }
});
