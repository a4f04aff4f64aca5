//! Fundamental types for the witness node.
//!
//! This crate defines the data shared across every other crate in the
//! workspace: peer identities, key material, signatures, timestamps and
//! the evidence grouping key used by elections.

pub mod error;
pub mod hash;
pub mod keys;
pub mod time;

pub use error::TypesError;
pub use hash::EvidenceKey;
pub use keys::{Identity, KeyPair, PrivateKey, Signature};
pub use time::Timestamp;
