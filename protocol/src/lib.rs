//! Wire protocol: length-prefixed framing, value encoding, the signed
//! message envelope, and the three-message mutual-authentication handshake.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;
pub mod version;

pub use error::{HandshakeError, ProtocolError};
pub use handshake::{Acceptor, Dialer, HandshakeState, Hello};
pub use message::{Headers, Message, MessageBuilder, DEFAULT_TTL, TYPE_HEADER};
pub use version::{PROTOCOL_VERSION, MIN_PROTOCOL_VERSION};
