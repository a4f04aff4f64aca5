#![no_main]

use libfuzzer_sys::fuzz_target;
use witness_crypto::{keypair_from_seed, SealedSignature};
use witness_protocol::{codec, Acceptor, Dialer, Hello};
use witness_types::Signature;

// Drive both handshake state machines with whatever decodes from the input.
fuzz_target!(|data: &[u8]| {
    let local = keypair_from_seed(&[7u8; 32]);

    if let Ok(hello) = codec::decode::<Hello>(data) {
        let mut acceptor = Acceptor::new(&local);
        if acceptor.on_hello(&hello).is_ok() {
            if let Ok(proof) = codec::decode::<Signature>(data) {
                let _ = acceptor.on_proof(&proof);
            }
        }
    }

    if let Ok(challenge) = codec::decode::<SealedSignature>(data) {
        let mut dialer = Dialer::new(&local, None);
        let _ = dialer.hello();
        if let Ok((peer, _proof)) = dialer.on_challenge(&challenge) {
            assert_ne!(peer, local.identity, "self-connect must be rejected");
        }
    }
});
