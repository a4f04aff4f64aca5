//! Evidence grouping key.
//!
//! [`EvidenceKey`] buckets identical evidence bytes together when an election
//! is summarized. It is a dedup key only: it is never used to authenticate
//! anything. Authenticity of evidence comes from the voter's signature.

use std::fmt;

use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

type Blake2b128 = Blake2b<U16>;

/// A 16-byte categorization key derived from evidence bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EvidenceKey([u8; 16]);

impl EvidenceKey {
    /// Derive the grouping key for `evidence`.
    pub fn of(evidence: &[u8]) -> Self {
        let digest = Blake2b128::digest(evidence);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for EvidenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvidenceKey({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for EvidenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
