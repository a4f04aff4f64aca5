//! Cryptographic primitives for the witness node.
//!
//! - **Ed25519** for signing and signature verification
//! - [`SealedSignature`]: a signature bundled with the key that produced it,
//!   so a verifier needs no prior knowledge of the signer
//! - [`WitnessActor`]: a named actor plus its sealed signature over a payload

pub mod keys;
pub mod sealed;
pub mod sign;
pub mod witness;

pub use keys::{generate_keypair, identity_from_private, keypair_from_seed};
pub use sealed::SealedSignature;
pub use sign::{sign_message, verify_signature};
pub use witness::WitnessActor;
