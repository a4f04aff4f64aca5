//! Ed25519 message signing and verification.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use witness_types::{Identity, PrivateKey, Signature};

/// Sign a message with a private key, returning the signature.
pub fn sign_message(message: &[u8], private_key: &PrivateKey) -> Signature {
    let signing_key = SigningKey::from_bytes(&private_key.0);
    Signature(signing_key.sign(message).to_bytes())
}

/// Verify a signature against a message and the signer's identity.
///
/// Returns `false` for any malformed key or signature instead of an error:
/// callers treat an invalid signature exactly like a missing one.
pub fn verify_signature(message: &[u8], signature: &Signature, signer: &Identity) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&signer.0) else {
        return false;
    };
    let dalek_sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key.verify(message, &dalek_sig).is_ok()
}
