use thiserror::Error;
use witness_protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("timed out waiting for the session to finalize")]
    Timeout,

    #[error("election manager has been disposed")]
    Disposed,

    #[error("a session for subject {0:?} is already active")]
    AlreadyActive(String),

    #[error("election payload codec error: {0}")]
    Codec(#[from] ProtocolError),
}
