use thiserror::Error;
use witness_types::Identity;

use crate::handshake::HandshakeState;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("connection closed by peer")]
    Closed,

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons the mutual-authentication handshake rejects a peer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    #[error("peer claims our own identity")]
    SelfConnect,

    #[error("challenge does not sign our identity")]
    InvalidChallenge,

    #[error("proof does not sign our identity with the claimed key")]
    InvalidProof,

    #[error("endpoint identity changed: pinned {pinned}, discovered {discovered}")]
    IdentityMismatch {
        pinned: Identity,
        discovered: Identity,
    },

    #[error("unexpected handshake step in state {0:?}")]
    OutOfOrder(HandshakeState),
}
