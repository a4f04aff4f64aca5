//! Self-describing signatures.

use serde::{Deserialize, Serialize};
use witness_types::{Identity, KeyPair, Signature};

use crate::sign::{sign_message, verify_signature};

/// A signature bundled with the identity that produced it.
///
/// Lets a verifier authenticate a claim without having learned the signer's
/// identity out-of-band. An invalid `SealedSignature` must be treated exactly
/// like an absent one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSignature {
    pub signature: Signature,
    pub signer: Identity,
}

impl SealedSignature {
    /// Sign `data` with `keypair`, embedding the key pair's identity.
    pub fn sign(data: &[u8], keypair: &KeyPair) -> Self {
        Self {
            signature: sign_message(data, &keypair.private),
            signer: keypair.identity,
        }
    }

    /// Recompute validity against the embedded identity and `data`.
    pub fn verify(&self, data: &[u8]) -> bool {
        verify_signature(data, &self.signature, &self.signer)
    }

    pub fn signer(&self) -> &Identity {
        &self.signer
    }
}
