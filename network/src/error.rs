use thiserror::Error;
use witness_types::Identity;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("peer {0} already has an authenticated connection")]
    DuplicateIdentity(Identity),

    #[error("protocol error: {0}")]
    Protocol(#[from] witness_protocol::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
