//! Named, signing actors.

use serde::{Deserialize, Serialize};
use witness_types::{Identity, KeyPair};

use crate::sealed::SealedSignature;

/// A named actor plus its sealed signature over some payload.
///
/// Used both for "who voted" and "who organized". The payload the signature
/// covers is not stored here; each caller verifies against the bytes it
/// received alongside the actor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessActor {
    pub name: String,
    pub signature: SealedSignature,
}

impl WitnessActor {
    /// Build an actor named `name` that signs `data` with `keypair`.
    pub fn sign(name: impl Into<String>, data: &[u8], keypair: &KeyPair) -> Self {
        Self {
            name: name.into(),
            signature: SealedSignature::sign(data, keypair),
        }
    }

    /// Valid iff the name is non-empty and the signature covers `data`.
    pub fn is_valid(&self, data: &[u8]) -> bool {
        !self.name.is_empty() && self.signature.verify(data)
    }

    pub fn identity(&self) -> &Identity {
        self.signature.signer()
    }
}
